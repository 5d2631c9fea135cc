// KTIY archive decoder.
//
// Parsing validates the whole archive up front: header, descriptor block,
// string table bounds, every name and every content range. After that,
// lookups are slice arithmetic into the caller's buffer and never copy
// content unless asked to.

use std::collections::HashMap;
use std::collections::hash_map::Entry as MapEntry;
use std::fmt;

use log::{debug, trace, warn};
use thiserror::Error;

use super::header::{ArchiveHeader, DESCRIPTOR_LEN, EntryDescriptor, HEADER_LEN, MAGIC};

// ---------------------------------------------------------------------------
// Decoder errors
// ---------------------------------------------------------------------------

/// Region of the archive that ran short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Header,
    Descriptors,
    StringTable,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Header => "header",
            Self::Descriptors => "descriptor block",
            Self::StringTable => "string table",
        })
    }
}

/// What is wrong with a single entry descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DescriptorFault {
    #[error("name offset {name_offset} is outside the {string_table_size}-byte string table")]
    NameOutOfBounds {
        name_offset: u64,
        string_table_size: u64,
    },
    #[error("name at offset {name_offset} has no NUL terminator inside the string table")]
    UnterminatedName { name_offset: u64 },
    #[error("name at offset {name_offset} is empty")]
    EmptyName { name_offset: u64 },
    #[error(
        "content {data_offset}+{data_length} runs past the {data_section_len}-byte data section"
    )]
    DataOutOfBounds {
        data_offset: u64,
        data_length: u64,
        data_section_len: u64,
    },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("bad magic: expected {:02X?}, got {found:02X?}", MAGIC)]
    BadMagic { found: [u8; 4] },
    /// `expected` saturates at `u64::MAX` when the declared size overflows.
    #[error("truncated {section}: need {expected} bytes, {available} available")]
    TruncatedHeader {
        section: Section,
        expected: u64,
        available: u64,
    },
    #[error("malformed descriptor {index}: {fault}")]
    MalformedDescriptor {
        index: usize,
        fault: DescriptorFault,
    },
    #[error("duplicate name \"{}\": entries {first} and {second}", .name.escape_ascii())]
    DuplicateName {
        name: Vec<u8>,
        first: usize,
        second: usize,
    },
}

// ---------------------------------------------------------------------------
// Entry view
// ---------------------------------------------------------------------------

/// One entry borrowed from the archive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry<'a> {
    pub name: &'a [u8],
    pub content: &'a [u8],
    pub descriptor: EntryDescriptor,
}

impl<'a> Entry<'a> {
    /// The name as UTF-8, if it is valid UTF-8.
    pub fn name_str(&self) -> Option<&'a str> {
        std::str::from_utf8(self.name).ok()
    }
}

// ---------------------------------------------------------------------------
// Archive
// ---------------------------------------------------------------------------

/// Validated, zero-copy view over an encoded archive.
///
/// # Example
/// ```
/// use ktiy::format::{Archive, encoder};
///
/// let bytes = encoder::encode_to_vec([("test", "hi"), ("silly", "lo")]).unwrap();
/// let archive = Archive::parse(&bytes).unwrap();
/// assert_eq!(archive.get("test"), Some(&b"hi"[..]));
/// assert_eq!(archive.get("missing"), None);
/// ```
#[derive(Debug, Clone)]
pub struct Archive<'a> {
    header: ArchiveHeader,
    descriptors: Vec<EntryDescriptor>,
    names: Vec<&'a [u8]>,
    string_table: &'a [u8],
    data: &'a [u8],
    index: HashMap<&'a [u8], usize>,
}

impl<'a> Archive<'a> {
    /// Parse and validate `bytes`.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, DecodeError> {
        if bytes.len() >= MAGIC.len() && bytes[..MAGIC.len()] != MAGIC {
            let mut found = [0u8; 4];
            found.copy_from_slice(&bytes[..MAGIC.len()]);
            warn!("refusing archive with magic {found:02X?}");
            return Err(DecodeError::BadMagic { found });
        }
        if bytes.len() < HEADER_LEN {
            return Err(DecodeError::TruncatedHeader {
                section: Section::Header,
                expected: HEADER_LEN as u64,
                available: bytes.len() as u64,
            });
        }

        let (header, reserved) = ArchiveHeader::parse(&bytes[..HEADER_LEN]);
        if reserved != [0u8; 4] {
            warn!("ignoring non-zero reserved field {reserved:02X?}");
        }
        let rest = &bytes[HEADER_LEN..];

        // Descriptor block.
        let block_len = header.descriptor_block_len().unwrap_or(u64::MAX);
        let block_len = take_len(rest, block_len, Section::Descriptors)?;
        let (block, rest) = rest.split_at(block_len);

        // String table.
        let table_len = take_len(rest, header.string_table_size, Section::StringTable)?;
        let (string_table, data) = rest.split_at(table_len);

        let descriptors: Vec<EntryDescriptor> = block
            .chunks_exact(DESCRIPTOR_LEN)
            .map(EntryDescriptor::parse)
            .collect();

        let mut names = Vec::with_capacity(descriptors.len());
        let mut index = HashMap::with_capacity(descriptors.len());
        let mut data_used = 0u64;

        for (i, desc) in descriptors.iter().enumerate() {
            let name = resolve_name(string_table, desc.name_offset)
                .map_err(|fault| DecodeError::MalformedDescriptor { index: i, fault })?;

            let end = desc
                .data_end()
                .filter(|&end| end <= data.len() as u64)
                .ok_or_else(|| DecodeError::MalformedDescriptor {
                    index: i,
                    fault: DescriptorFault::DataOutOfBounds {
                        data_offset: desc.data_offset,
                        data_length: desc.data_length,
                        data_section_len: data.len() as u64,
                    },
                })?;
            data_used = data_used.max(end);

            match index.entry(name) {
                MapEntry::Occupied(prev) => {
                    return Err(DecodeError::DuplicateName {
                        name: name.to_vec(),
                        first: *prev.get(),
                        second: i,
                    });
                }
                MapEntry::Vacant(slot) => {
                    slot.insert(i);
                }
            }

            trace!(
                "entry {i} \"{}\": data@{}+{}",
                name.escape_ascii(),
                desc.data_offset,
                desc.data_length
            );
            names.push(name);
        }

        if data_used < data.len() as u64 {
            warn!(
                "{} trailing bytes after the last entry's content",
                data.len() as u64 - data_used
            );
        }
        debug!(
            "decoded archive: {} entries, string table {} bytes, data section {} bytes",
            header.entry_count,
            string_table.len(),
            data.len()
        );

        Ok(Self {
            header,
            descriptors,
            names,
            string_table,
            data,
            index,
        })
    }

    #[inline]
    pub fn header(&self) -> ArchiveHeader {
        self.header
    }

    #[inline]
    pub fn descriptors(&self) -> &[EntryDescriptor] {
        &self.descriptors
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    #[inline]
    pub fn string_table(&self) -> &'a [u8] {
        self.string_table
    }

    /// Everything after the string table, including any trailing bytes.
    #[inline]
    pub fn data_section(&self) -> &'a [u8] {
        self.data
    }

    /// Look up an entry's content by name.
    pub fn get(&self, name: impl AsRef<[u8]>) -> Option<&'a [u8]> {
        self.index.get(name.as_ref()).map(|&i| self.content_at(i))
    }

    pub fn contains(&self, name: impl AsRef<[u8]>) -> bool {
        self.index.contains_key(name.as_ref())
    }

    /// Position of `name` in on-disk order.
    pub fn position(&self, name: impl AsRef<[u8]>) -> Option<usize> {
        self.index.get(name.as_ref()).copied()
    }

    pub fn entry(&self, i: usize) -> Option<Entry<'a>> {
        let descriptor = *self.descriptors.get(i)?;
        Some(Entry {
            name: self.names[i],
            content: self.content_at(i),
            descriptor,
        })
    }

    /// Entries in on-disk order.
    pub fn iter(&self) -> Entries<'_, 'a> {
        Entries {
            archive: self,
            front: 0,
            back: self.len(),
        }
    }

    pub fn names(&self) -> impl ExactSizeIterator<Item = &'a [u8]> + '_ {
        self.names.iter().copied()
    }

    /// Copy up to `buf.len()` bytes of `name`'s content, starting `offset`
    /// bytes in. Returns the number of bytes copied, or `None` if there is no
    /// such entry. Reading at or past the end copies nothing.
    pub fn read_at(&self, name: impl AsRef<[u8]>, offset: u64, buf: &mut [u8]) -> Option<usize> {
        let content = self.get(name)?;
        let start = usize::try_from(offset)
            .unwrap_or(usize::MAX)
            .min(content.len());
        let n = (content.len() - start).min(buf.len());
        buf[..n].copy_from_slice(&content[start..start + n]);
        Some(n)
    }

    /// Owned copies of every `(name, content)` pair, in on-disk order.
    pub fn to_owned_entries(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.iter()
            .map(|e| (e.name.to_vec(), e.content.to_vec()))
            .collect()
    }

    // Ranges were checked in `parse`.
    fn content_at(&self, i: usize) -> &'a [u8] {
        let desc = &self.descriptors[i];
        let start = desc.data_offset as usize;
        &self.data[start..start + desc.data_length as usize]
    }
}

impl<'r, 'a> IntoIterator for &'r Archive<'a> {
    type Item = Entry<'a>;
    type IntoIter = Entries<'r, 'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over archive entries in on-disk order.
#[derive(Debug, Clone)]
pub struct Entries<'r, 'a> {
    archive: &'r Archive<'a>,
    front: usize,
    back: usize,
}

impl<'a> Iterator for Entries<'_, 'a> {
    type Item = Entry<'a>;

    fn next(&mut self) -> Option<Entry<'a>> {
        if self.front >= self.back {
            return None;
        }
        let entry = self.archive.entry(self.front);
        self.front += 1;
        entry
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.back - self.front;
        (n, Some(n))
    }
}

impl<'a> DoubleEndedIterator for Entries<'_, 'a> {
    fn next_back(&mut self) -> Option<Entry<'a>> {
        if self.front >= self.back {
            return None;
        }
        self.back -= 1;
        self.archive.entry(self.back)
    }
}

impl ExactSizeIterator for Entries<'_, '_> {}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Check that `rest` holds at least `len` bytes and return `len` as usize.
fn take_len(rest: &[u8], len: u64, section: Section) -> Result<usize, DecodeError> {
    match usize::try_from(len) {
        Ok(n) if n <= rest.len() => Ok(n),
        _ => Err(DecodeError::TruncatedHeader {
            section,
            expected: len,
            available: rest.len() as u64,
        }),
    }
}

fn resolve_name(string_table: &[u8], name_offset: u64) -> Result<&[u8], DescriptorFault> {
    let start = usize::try_from(name_offset)
        .ok()
        .filter(|&s| s < string_table.len())
        .ok_or(DescriptorFault::NameOutOfBounds {
            name_offset,
            string_table_size: string_table.len() as u64,
        })?;
    let tail = &string_table[start..];
    match tail.iter().position(|&b| b == 0) {
        None => Err(DescriptorFault::UnterminatedName { name_offset }),
        Some(0) => Err(DescriptorFault::EmptyName { name_offset }),
        Some(end) => Ok(&tail[..end]),
    }
}

/// Decode `bytes` into owned `(name, content)` pairs.
pub fn decode_all(bytes: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, DecodeError> {
    Ok(Archive::parse(bytes)?.to_owned_entries())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
