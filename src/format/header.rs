// KTIY archive header and entry descriptor encoding/decoding.
//
// All integers are little-endian and nothing is padded or aligned:
//
//   magic              4 bytes   b"KTIY"
//   reserved           4 bytes   zero on write, ignored on read
//   entry_count        u64
//   string_table_size  u64
//   descriptors        entry_count * 24 bytes
//   string table       string_table_size bytes
//   data section       remainder of the stream

use std::io::{self, Write};

// ---------------------------------------------------------------------------
// Magic and fixed sizes
// ---------------------------------------------------------------------------

pub const MAGIC: [u8; 4] = *b"KTIY";

/// Size of the fixed archive header (magic, reserved, two u64 counts).
pub const HEADER_LEN: usize = 24;

/// Size of one entry descriptor (three u64 fields).
pub const DESCRIPTOR_LEN: usize = 24;

/// Length of the NUL terminator following each name in the string table.
pub const NAME_TERMINATOR_LEN: u64 = 1;

#[inline]
pub(crate) fn read_u64_le(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

// ---------------------------------------------------------------------------
// Archive header
// ---------------------------------------------------------------------------

/// Parsed fixed-size archive header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArchiveHeader {
    /// Number of entry descriptors following the header.
    pub entry_count: u64,
    /// Total string table length, terminators included.
    pub string_table_size: u64,
}

impl ArchiveHeader {
    /// Encode the header.
    ///
    /// Layout:
    /// 1. Magic (4 bytes)
    /// 2. Reserved, always zero (4 bytes)
    /// 3. entry_count (u64 LE)
    /// 4. string_table_size (u64 LE)
    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&MAGIC)?;
        w.write_all(&[0u8; 4])?;
        w.write_all(&self.entry_count.to_le_bytes())?;
        w.write_all(&self.string_table_size.to_le_bytes())?;
        Ok(())
    }

    /// Parse the header from the first `HEADER_LEN` bytes of `bytes`.
    ///
    /// The caller checks the magic and the length; this only extracts fields.
    /// Returns the header together with the raw reserved word.
    pub(crate) fn parse(bytes: &[u8]) -> (Self, [u8; 4]) {
        let mut reserved = [0u8; 4];
        reserved.copy_from_slice(&bytes[4..8]);
        let header = Self {
            entry_count: read_u64_le(bytes, 8),
            string_table_size: read_u64_le(bytes, 16),
        };
        (header, reserved)
    }

    /// Byte length of the descriptor block, or `None` on overflow.
    pub fn descriptor_block_len(&self) -> Option<u64> {
        self.entry_count.checked_mul(DESCRIPTOR_LEN as u64)
    }
}

// ---------------------------------------------------------------------------
// Entry descriptor
// ---------------------------------------------------------------------------

/// Fixed-size record locating one entry's name and content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryDescriptor {
    /// Offset of the name within the string table.
    pub name_offset: u64,
    /// Offset of the content within the data section.
    pub data_offset: u64,
    /// Content length in bytes.
    pub data_length: u64,
}

impl EntryDescriptor {
    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.name_offset.to_le_bytes())?;
        w.write_all(&self.data_offset.to_le_bytes())?;
        w.write_all(&self.data_length.to_le_bytes())?;
        Ok(())
    }

    /// Parse a descriptor from exactly `DESCRIPTOR_LEN` bytes.
    pub(crate) fn parse(bytes: &[u8]) -> Self {
        Self {
            name_offset: read_u64_le(bytes, 0),
            data_offset: read_u64_le(bytes, 8),
            data_length: read_u64_le(bytes, 16),
        }
    }

    /// End of the content range within the data section, or `None` on overflow.
    #[inline]
    pub fn data_end(&self) -> Option<u64> {
        self.data_offset.checked_add(self.data_length)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
