// File-level helpers around the archive encoder and decoder.
//
// - `pack_file()` writes an archive to a temporary file next to its
//   destination and renames it into place only once every byte has been
//   written and synced.
// - `collect_dir()` turns a directory tree into an ordered entry list.
// - `unpack_to_dir()` / `unpack_file()` extract entries back to disk.
//
// With the `file-io` feature, `pack_file()` also computes a streaming
// SHA-256 of the archive it wrote.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Component, Path, PathBuf};

use log::{debug, trace};
use thiserror::Error;
use walkdir::WalkDir;

#[cfg(feature = "file-io")]
use sha2::Digest;

use crate::format::decoder::{Archive, DecodeError};
use crate::format::encoder::{self, EncodeError};

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Statistics returned by `pack_file()`.
#[derive(Debug, Clone)]
pub struct PackStats {
    /// Number of entries in the archive.
    pub entry_count: u64,
    /// Total content bytes across all entries.
    pub data_len: u64,
    /// Size of the written archive in bytes.
    pub archive_len: u64,
    /// SHA-256 of the archive (if `file-io` feature is enabled).
    pub archive_sha256: Option<[u8; 32]>,
}

/// Statistics returned by `unpack_to_dir()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnpackStats {
    pub files: u64,
    pub bytes: u64,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error type for file I/O operations.
#[derive(Debug, Error)]
pub enum IoError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("path is not valid UTF-8: {}", .0.display())]
    NonUtf8Path(PathBuf),
    #[error("refusing to extract entry \"{}\": {reason}", .name.escape_ascii())]
    UnsafeName { name: Vec<u8>, reason: &'static str },
    #[error(
        "entries \"{}\" and \"{}\" extract to clashing paths",
        .other.escape_ascii(),
        .name.escape_ascii()
    )]
    NameConflict { name: Vec<u8>, other: Vec<u8> },
    #[error("output file exists: {}", .0.display())]
    OutputExists(PathBuf),
}

// ---------------------------------------------------------------------------
// Default buffer size
// ---------------------------------------------------------------------------

const BUF_SIZE: usize = 64 * 1024; // 64 KiB

// ---------------------------------------------------------------------------
// pack_file
// ---------------------------------------------------------------------------

/// Encode `entries` into an archive at `path`.
///
/// The archive is written to a uniquely named temporary file in the same
/// directory, synced, and then renamed over `path`. If anything fails,
/// including the rename, the temporary file is removed and `path` is left
/// as it was. The archive is created with owner-only permissions.
pub fn pack_file<I, N, C>(path: &Path, entries: I) -> Result<PackStats, IoError>
where
    I: IntoIterator<Item = (N, C)>,
    N: AsRef<[u8]>,
    C: AsRef<[u8]>,
{
    let mut temp = tempfile::Builder::new()
        .prefix(".ktiy-")
        .suffix(".tmp")
        .tempfile_in(parent_dir(path))?;
    trace!("staging archive in {}", temp.path().display());

    // Dropping `temp` on any early return deletes it.
    let stats = write_archive(temp.as_file_mut(), entries)?;
    temp.persist(path).map_err(|e| e.error)?;

    debug!(
        "packed {} entries ({} bytes) into {}",
        stats.entry_count,
        stats.archive_len,
        path.display()
    );
    Ok(stats)
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn write_archive<I, N, C>(file: &mut File, entries: I) -> Result<PackStats, IoError>
where
    I: IntoIterator<Item = (N, C)>,
    N: AsRef<[u8]>,
    C: AsRef<[u8]>,
{
    let mut writer = BufWriter::with_capacity(BUF_SIZE, &mut *file);

    #[cfg(feature = "file-io")]
    let mut hasher = sha2::Sha256::new();

    #[cfg(feature = "file-io")]
    let summary = {
        let hashing_writer = HashingWriter {
            inner: &mut writer,
            hasher: &mut hasher,
        };
        encoder::encode_all(hashing_writer, entries)?
    };

    #[cfg(not(feature = "file-io"))]
    let summary = encoder::encode_all(&mut writer, entries)?;

    writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;

    #[cfg(feature = "file-io")]
    let archive_sha256 = Some(hasher.finalize().into());
    #[cfg(not(feature = "file-io"))]
    let archive_sha256: Option<[u8; 32]> = None;

    Ok(PackStats {
        entry_count: summary.entry_count,
        data_len: summary.data_len,
        archive_len: summary.total_len,
        archive_sha256,
    })
}

// ---------------------------------------------------------------------------
// collect_dir
// ---------------------------------------------------------------------------

/// How `collect_dir()` walks a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectOptions {
    /// Descend into subdirectories.
    pub recursive: bool,
    /// Follow symbolic links. When off, links are skipped.
    pub follow_links: bool,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            follow_links: false,
        }
    }
}

/// Read every regular file under `dir` into an ordered entry list.
///
/// Entries are sorted by file name at each level. A file's entry name is its
/// path relative to `dir` with components joined by `/`.
pub fn collect_dir(dir: &Path, opts: &CollectOptions) -> Result<Vec<(String, Vec<u8>)>, IoError> {
    let mut walker = WalkDir::new(dir)
        .min_depth(1)
        .follow_links(opts.follow_links)
        .sort_by_file_name();
    if !opts.recursive {
        walker = walker.max_depth(1);
    }

    let mut entries = Vec::new();
    for dent in walker {
        let dent = dent?;
        if !dent.file_type().is_file() {
            continue;
        }
        let rel = dent.path().strip_prefix(dir).unwrap_or(dent.path());
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| IoError::NonUtf8Path(dent.path().to_path_buf()))?
            .join("/");
        let content = fs::read(dent.path())?;
        trace!("collected {name} ({} bytes)", content.len());
        entries.push((name, content));
    }

    debug!("collected {} files from {}", entries.len(), dir.display());
    Ok(entries)
}

// ---------------------------------------------------------------------------
// Reading and extraction
// ---------------------------------------------------------------------------

/// Read a whole archive file into memory for `Archive::parse`.
pub fn read_archive_file(path: &Path) -> Result<Vec<u8>, IoError> {
    let bytes = fs::read(path)?;
    debug!("read {} bytes from {}", bytes.len(), path.display());
    Ok(bytes)
}

/// Map an entry name to a relative path that stays inside the output dir.
///
/// The result is normalised, so `a//b` and `a/b/` both map to `a/b`.
fn safe_relative_path(name: &[u8]) -> Result<PathBuf, IoError> {
    let unsafe_name = |reason| IoError::UnsafeName {
        name: name.to_vec(),
        reason,
    };
    let name = std::str::from_utf8(name).map_err(|_| unsafe_name("name is not UTF-8"))?;
    let mut rel = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => rel.push(part),
            _ => return Err(unsafe_name("name is not a plain relative path")),
        }
    }
    Ok(rel)
}

/// Write every entry of `archive` to `dir/<name>`, creating parent
/// directories as needed.
///
/// Every name is checked before anything is written: unsafe names, two
/// names mapping to the same path, a name that is also a parent directory
/// of another entry, and (unless `overwrite`) targets that already exist.
pub fn unpack_to_dir(
    archive: &Archive<'_>,
    dir: &Path,
    overwrite: bool,
) -> Result<UnpackStats, IoError> {
    let mut planned: Vec<(PathBuf, &[u8], &[u8])> = Vec::with_capacity(archive.len());
    let mut by_path: HashMap<PathBuf, usize> = HashMap::with_capacity(archive.len());
    for entry in archive {
        let rel = safe_relative_path(entry.name)?;
        if let Some(&prev) = by_path.get(&rel) {
            return Err(IoError::NameConflict {
                name: entry.name.to_vec(),
                other: planned[prev].1.to_vec(),
            });
        }
        by_path.insert(rel.clone(), planned.len());
        planned.push((rel, entry.name, entry.content));
    }

    for (rel, name, _) in &planned {
        if let Some(&i) = rel.ancestors().skip(1).find_map(|a| by_path.get(a)) {
            return Err(IoError::NameConflict {
                name: name.to_vec(),
                other: planned[i].1.to_vec(),
            });
        }
    }

    let targets: Vec<(PathBuf, &[u8])> = planned
        .into_iter()
        .map(|(rel, _, content)| (dir.join(rel), content))
        .collect();
    let existing = targets
        .iter()
        .find(|(target, _)| !overwrite && target.exists());
    if let Some((target, _)) = existing {
        return Err(IoError::OutputExists(target.clone()));
    }

    let mut stats = UnpackStats::default();
    for (target, content) in targets {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, content)?;
        trace!("wrote {} ({} bytes)", target.display(), content.len());
        stats.files += 1;
        stats.bytes += content.len() as u64;
    }

    debug!(
        "unpacked {} files ({} bytes) into {}",
        stats.files,
        stats.bytes,
        dir.display()
    );
    Ok(stats)
}

/// Read, validate and extract the archive at `path` into `dir`.
pub fn unpack_file(path: &Path, dir: &Path, overwrite: bool) -> Result<UnpackStats, IoError> {
    let bytes = read_archive_file(path)?;
    let archive = Archive::parse(&bytes)?;
    unpack_to_dir(&archive, dir, overwrite)
}

// ---------------------------------------------------------------------------
// Hashing writer (used with file-io feature)
// ---------------------------------------------------------------------------

#[cfg(feature = "file-io")]
struct HashingWriter<'a, W: Write> {
    inner: &'a mut W,
    hasher: &'a mut sha2::Sha256,
}

#[cfg(feature = "file-io")]
impl<W: Write> Write for HashingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn pack_then_read_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("init.rd");

        let stats = pack_file(&path, [("test", "hi"), ("silly", "lo")]).unwrap();
        assert_eq!(stats.entry_count, 2);
        assert_eq!(stats.data_len, 4);

        let bytes = read_archive_file(&path).unwrap();
        assert_eq!(bytes.len() as u64, stats.archive_len);
        let archive = Archive::parse(&bytes).unwrap();
        assert_eq!(archive.get("silly"), Some(&b"lo"[..]));
        assert_eq!(listing(dir.path()), vec!["init.rd"]);
    }

    #[cfg(feature = "file-io")]
    #[test]
    fn sha256_matches_file_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("init.rd");
        let stats = pack_file(&path, [("a", "b")]).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let expected: [u8; 32] = sha2::Sha256::digest(&bytes).into();
        assert_eq!(stats.archive_sha256, Some(expected));
    }

    #[test]
    fn failed_pack_leaves_destination_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("init.rd");
        std::fs::write(&path, b"previous").unwrap();

        let err = pack_file(&path, [("dup", "1"), ("dup", "2")]).unwrap_err();
        assert!(matches!(
            err,
            IoError::Encode(EncodeError::DuplicateName { .. })
        ));
        assert_eq!(std::fs::read(&path).unwrap(), b"previous");
        assert_eq!(listing(dir.path()), vec!["init.rd"]);
    }

    #[test]
    fn failed_rename_removes_staged_archive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("init.rd");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("occupied"), b"x").unwrap();

        let err = pack_file(&path, [("a", "b")]).unwrap_err();
        assert!(matches!(err, IoError::Io(_)), "{err}");
        assert_eq!(listing(dir.path()), vec!["init.rd"]);
        assert_eq!(listing(&path), vec!["occupied"]);
    }

    #[test]
    fn pack_keeps_unrelated_tmp_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("init.rd");
        let bystander = dir.path().join("init.rd.tmp");
        std::fs::write(&bystander, b"not ours").unwrap();

        pack_file(&path, [("a", "b")]).unwrap();
        assert!(pack_file(&path, [("a", "1"), ("a", "2")]).is_err());
        assert_eq!(std::fs::read(&bystander).unwrap(), b"not ours");
        assert_eq!(listing(dir.path()), vec!["init.rd", "init.rd.tmp"]);
    }

    #[test]
    fn parent_dir_of_bare_file_name() {
        assert_eq!(parent_dir(Path::new("init.rd")), Path::new("."));
        assert_eq!(parent_dir(Path::new("/boot/init.rd")), Path::new("/boot"));
    }

    #[test]
    fn collect_dir_sorted_and_relative() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        std::fs::write(dir.path().join("zeta"), b"z").unwrap();
        std::fs::write(dir.path().join("alpha"), b"a").unwrap();
        std::fs::write(dir.path().join("bin/init"), b"#!").unwrap();

        let entries = collect_dir(dir.path(), &CollectOptions::default()).unwrap();
        let names: Vec<_> = entries.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["alpha", "bin/init", "zeta"]);
        assert_eq!(entries[1].1, b"#!");

        let flat = collect_dir(
            dir.path(),
            &CollectOptions {
                recursive: false,
                ..Default::default()
            },
        )
        .unwrap();
        let names: Vec<_> = flat.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[cfg(unix)]
    #[test]
    fn collect_dir_symlinks_only_when_following() {
        let dir = tempdir().unwrap();
        let outside = tempdir().unwrap();
        std::fs::write(outside.path().join("real"), b"target").unwrap();
        std::fs::write(dir.path().join("plain"), b"p").unwrap();
        std::os::unix::fs::symlink(outside.path().join("real"), dir.path().join("link")).unwrap();

        let entries = collect_dir(dir.path(), &CollectOptions::default()).unwrap();
        let names: Vec<_> = entries.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["plain"]);

        let followed = collect_dir(
            dir.path(),
            &CollectOptions {
                follow_links: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(
            followed,
            vec![
                ("link".to_string(), b"target".to_vec()),
                ("plain".to_string(), b"p".to_vec()),
            ]
        );
    }

    #[test]
    fn unpack_roundtrip() {
        let dir = tempdir().unwrap();
        let archive_path = dir.path().join("init.rd");
        let out = dir.path().join("out");

        pack_file(&archive_path, [("etc/motd", "hello"), ("empty", "")]).unwrap();
        let stats = unpack_file(&archive_path, &out, false).unwrap();
        assert_eq!(stats, UnpackStats { files: 2, bytes: 5 });
        assert_eq!(std::fs::read(out.join("etc/motd")).unwrap(), b"hello");
        assert_eq!(std::fs::read(out.join("empty")).unwrap(), b"");

        let err = unpack_file(&archive_path, &out, false).unwrap_err();
        assert!(matches!(err, IoError::OutputExists(_)));
        unpack_file(&archive_path, &out, true).unwrap();
    }

    #[test]
    fn existing_target_stops_unpack_before_any_write() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("b"), b"old").unwrap();

        let bytes = encoder::encode_to_vec([("a", "1"), ("b", "2")]).unwrap();
        let archive = Archive::parse(&bytes).unwrap();
        let err = unpack_to_dir(&archive, dir.path(), false).unwrap_err();
        match err {
            IoError::OutputExists(path) => assert_eq!(path, dir.path().join("b")),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(listing(dir.path()), vec!["b"]);
        assert_eq!(std::fs::read(dir.path().join("b")).unwrap(), b"old");
    }

    #[test]
    fn file_and_directory_clash_is_rejected_up_front() {
        let dir = tempdir().unwrap();
        for entries in [
            [("a", "1"), ("a/b", "2")],
            [("a/b", "2"), ("a", "1")],
            [("x/y", "1"), ("x//y", "2")],
        ] {
            let bytes = encoder::encode_to_vec(entries).unwrap();
            let archive = Archive::parse(&bytes).unwrap();
            let err = unpack_to_dir(&archive, dir.path(), true).unwrap_err();
            assert!(matches!(err, IoError::NameConflict { .. }), "{err}");
        }
        assert!(listing(dir.path()).is_empty());
    }

    #[test]
    fn name_conflict_message() {
        let bytes = encoder::encode_to_vec([("a", "1"), ("a/b", "2")]).unwrap();
        let archive = Archive::parse(&bytes).unwrap();
        let err = unpack_to_dir(&archive, Path::new("unused"), true).unwrap_err();
        assert_eq!(
            err.to_string(),
            "entries \"a\" and \"a/b\" extract to clashing paths"
        );
    }

    #[test]
    fn unpack_rejects_escaping_names() {
        let dir = tempdir().unwrap();
        for name in ["../evil", "/abs", "a/../../b", "./x"] {
            let bytes = encoder::encode_to_vec([(name, "x")]).unwrap();
            let archive = Archive::parse(&bytes).unwrap();
            let err = unpack_to_dir(&archive, dir.path(), true).unwrap_err();
            assert!(matches!(err, IoError::UnsafeName { .. }), "{name}: {err}");
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn unpack_file_reports_decode_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.rd");
        std::fs::write(&path, b"NOPE0000").unwrap();
        let err = unpack_file(&path, dir.path(), false).unwrap_err();
        assert!(matches!(err, IoError::Decode(DecodeError::BadMagic { .. })));
    }
}
