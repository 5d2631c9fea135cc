// KTIY archive encoder.
//
// Encoding happens in two steps:
//   1. `ArchiveLayout::plan` validates every name and computes all
//      descriptors in one pass, carrying the string-table and data cursors
//      as running totals.
//   2. The header, descriptors, string table and data section are written
//      back-to-back in that order.
//
// Nothing is written until planning succeeds, so a rejected name never
// leaves a partial archive in the sink.

use std::collections::HashMap;
use std::collections::hash_map::Entry as MapEntry;
use std::io::{self, Write};

use log::{debug, trace};
use thiserror::Error;

use super::header::{
    ArchiveHeader, DESCRIPTOR_LEN, EntryDescriptor, HEADER_LEN, NAME_TERMINATOR_LEN,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a name cannot be stored in the string table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NameFault {
    #[error("name is empty")]
    Empty,
    #[error("name contains a NUL byte at position {0}")]
    ContainsNul(usize),
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("invalid name for entry {index} (\"{}\"): {fault}", .name.escape_ascii())]
    InvalidName {
        index: usize,
        name: Vec<u8>,
        fault: NameFault,
    },
    #[error("duplicate name \"{}\": entries {first} and {second}", .name.escape_ascii())]
    DuplicateName {
        name: Vec<u8>,
        first: usize,
        second: usize,
    },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Check that `name` can be stored NUL-terminated in the string table.
pub fn validate_name(name: &[u8]) -> Result<(), NameFault> {
    if name.is_empty() {
        return Err(NameFault::Empty);
    }
    match name.iter().position(|&b| b == 0) {
        Some(pos) => Err(NameFault::ContainsNul(pos)),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Layout planning
// ---------------------------------------------------------------------------

/// Header and descriptors for a validated, ordered entry list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLayout {
    header: ArchiveHeader,
    descriptors: Vec<EntryDescriptor>,
    data_len: u64,
}

impl ArchiveLayout {
    /// Validate names and compute every descriptor in entry order.
    pub fn plan<N, C>(entries: &[(N, C)]) -> Result<Self, EncodeError>
    where
        N: AsRef<[u8]>,
        C: AsRef<[u8]>,
    {
        let mut seen: HashMap<&[u8], usize> = HashMap::with_capacity(entries.len());
        let mut descriptors = Vec::with_capacity(entries.len());
        let mut name_cursor = 0u64;
        let mut data_cursor = 0u64;

        for (index, (name, content)) in entries.iter().enumerate() {
            let name = name.as_ref();
            let content = content.as_ref();

            validate_name(name).map_err(|fault| EncodeError::InvalidName {
                index,
                name: name.to_vec(),
                fault,
            })?;

            match seen.entry(name) {
                MapEntry::Occupied(prev) => {
                    return Err(EncodeError::DuplicateName {
                        name: name.to_vec(),
                        first: *prev.get(),
                        second: index,
                    });
                }
                MapEntry::Vacant(slot) => {
                    slot.insert(index);
                }
            }

            let desc = EntryDescriptor {
                name_offset: name_cursor,
                data_offset: data_cursor,
                data_length: content.len() as u64,
            };
            trace!(
                "entry {index} \"{}\": name@{} data@{}+{}",
                name.escape_ascii(),
                desc.name_offset,
                desc.data_offset,
                desc.data_length
            );
            descriptors.push(desc);

            name_cursor += name.len() as u64 + NAME_TERMINATOR_LEN;
            data_cursor += desc.data_length;
        }

        Ok(Self {
            header: ArchiveHeader {
                entry_count: descriptors.len() as u64,
                string_table_size: name_cursor,
            },
            descriptors,
            data_len: data_cursor,
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

    /// Total data section length.
    #[inline]
    pub fn data_len(&self) -> u64 {
        self.data_len
    }

    /// Exact size of the encoded archive in bytes.
    pub fn encoded_len(&self) -> u64 {
        HEADER_LEN as u64
            + self.header.entry_count * DESCRIPTOR_LEN as u64
            + self.header.string_table_size
            + self.data_len
    }
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// What an encode call wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeSummary {
    pub entry_count: u64,
    pub string_table_size: u64,
    pub data_len: u64,
    /// Total bytes written to the sink.
    pub total_len: u64,
}

// ---------------------------------------------------------------------------
// One-shot encoding
// ---------------------------------------------------------------------------

/// Encode an ordered list of `(name, content)` pairs into `writer`.
///
/// # Example
/// ```
/// use ktiy::format::encoder;
///
/// let mut out = Vec::new();
/// encoder::encode_all(&mut out, [("test", "hi"), ("silly", "lo")]).unwrap();
/// assert_eq!(&out[..4], b"KTIY");
/// ```
pub fn encode_all<W, I, N, C>(mut writer: W, entries: I) -> Result<EncodeSummary, EncodeError>
where
    W: Write,
    I: IntoIterator<Item = (N, C)>,
    N: AsRef<[u8]>,
    C: AsRef<[u8]>,
{
    let entries: Vec<(N, C)> = entries.into_iter().collect();
    let layout = ArchiveLayout::plan(&entries)?;
    write_planned(&mut writer, &layout, &entries)?;
    writer.flush()?;

    let summary = EncodeSummary {
        entry_count: layout.header.entry_count,
        string_table_size: layout.header.string_table_size,
        data_len: layout.data_len,
        total_len: layout.encoded_len(),
    };
    debug!(
        "encoded archive: {} entries, string table {} bytes, data {} bytes, total {} bytes",
        summary.entry_count, summary.string_table_size, summary.data_len, summary.total_len
    );
    Ok(summary)
}

/// Encode into a freshly allocated buffer.
pub fn encode_to_vec<I, N, C>(entries: I) -> Result<Vec<u8>, EncodeError>
where
    I: IntoIterator<Item = (N, C)>,
    N: AsRef<[u8]>,
    C: AsRef<[u8]>,
{
    let mut out = Vec::new();
    encode_all(&mut out, entries)?;
    Ok(out)
}

fn write_planned<W, N, C>(w: &mut W, layout: &ArchiveLayout, entries: &[(N, C)]) -> io::Result<()>
where
    W: Write,
    N: AsRef<[u8]>,
    C: AsRef<[u8]>,
{
    layout.header.encode(w)?;
    for desc in &layout.descriptors {
        desc.encode(w)?;
    }
    for (name, _) in entries {
        w.write_all(name.as_ref())?;
        w.write_all(&[0])?;
    }
    for (_, content) in entries {
        w.write_all(content.as_ref())?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ArchiveBuilder
// ---------------------------------------------------------------------------

/// Owned, incrementally built entry list.
///
/// Names are validated as they are added, so `write_to` can only fail on
/// sink errors.
///
/// # Example
/// ```
/// use ktiy::format::ArchiveBuilder;
///
/// let mut builder = ArchiveBuilder::new();
/// builder.add("init", b"#!/bin/sh\n".to_vec()).unwrap();
/// let bytes = builder.to_vec().unwrap();
/// assert_eq!(bytes.len() as u64, builder.encoded_len());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ArchiveBuilder {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    index: HashMap<Vec<u8>, usize>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry at the end of the archive.
    pub fn add(
        &mut self,
        name: impl Into<Vec<u8>>,
        content: impl Into<Vec<u8>>,
    ) -> Result<&mut Self, EncodeError> {
        let name = name.into();
        let position = self.entries.len();

        if let Err(fault) = validate_name(&name) {
            return Err(EncodeError::InvalidName {
                index: position,
                name,
                fault,
            });
        }
        if let Some(&first) = self.index.get(&name) {
            return Err(EncodeError::DuplicateName {
                name,
                first,
                second: position,
            });
        }

        self.index.insert(name.clone(), position);
        self.entries.push((name, content.into()));
        Ok(self)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: impl AsRef<[u8]>) -> bool {
        self.index.contains_key(name.as_ref())
    }

    /// Size the archive will have once written.
    pub fn encoded_len(&self) -> u64 {
        self.entries
            .iter()
            .fold(HEADER_LEN as u64, |acc, (name, content)| {
                acc + DESCRIPTOR_LEN as u64
                    + name.len() as u64
                    + NAME_TERMINATOR_LEN
                    + content.len() as u64
            })
    }

    pub fn write_to<W: Write>(&self, writer: W) -> Result<EncodeSummary, EncodeError> {
        encode_all(
            writer,
            self.entries
                .iter()
                .map(|(name, content)| (name.as_slice(), content.as_slice())),
        )
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, EncodeError> {
        let mut out = Vec::with_capacity(self.encoded_len() as usize);
        self.write_to(&mut out)?;
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
