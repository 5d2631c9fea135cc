//! Ktiy: writer and zero-copy reader for the KTIY initial ramdisk format.
//!
//! A KTIY archive is a flat, uncompressed table of named files: a fixed
//! header, one 24-byte descriptor per entry, a string table of
//! NUL-terminated names and a data section holding every file's bytes
//! back-to-back.
//!
//! The crate provides:
//! - The format itself: encoder, decoder and layout types (`format`)
//! - File-oriented helpers: atomic packing, directory collection and
//!   extraction (`io`)
//! - An optional CLI (`cli` feature)
//!
//! # Quick Start
//!
//! ```
//! use ktiy::format::{Archive, encoder};
//!
//! let bytes = encoder::encode_to_vec([("init", "#!/bin/sh\n"), ("motd", "hello")]).unwrap();
//! let archive = Archive::parse(&bytes).unwrap();
//! assert_eq!(archive.get("motd"), Some(&b"hello"[..]));
//! ```

pub mod format;
pub mod io;

#[cfg(feature = "cli")]
pub mod cli;
