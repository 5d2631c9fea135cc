// KTIY initial ramdisk archive format.
//
// # Modules
//
// - `header`:  Fixed header and entry descriptor layout
// - `encoder`: Layout planning and archive emission
// - `decoder`: Validating, zero-copy archive reader

pub mod decoder;
pub mod encoder;
pub mod header;

// Re-export key types for convenience.
pub use decoder::{Archive, DecodeError, DescriptorFault, Entries, Entry, Section, decode_all};
pub use encoder::{
    ArchiveBuilder, ArchiveLayout, EncodeError, EncodeSummary, NameFault, encode_all, encode_to_vec,
};
pub use header::{ArchiveHeader, DESCRIPTOR_LEN, EntryDescriptor, HEADER_LEN, MAGIC};
