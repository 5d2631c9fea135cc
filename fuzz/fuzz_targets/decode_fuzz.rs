#![no_main]
use libfuzzer_sys::fuzz_target;
use ktiy::format::{Archive, MAGIC};

fn exercise(bytes: &[u8]) {
    let Ok(archive) = Archive::parse(bytes) else {
        return;
    };
    for entry in &archive {
        assert_eq!(archive.get(entry.name), Some(entry.content));
        let mut buf = [0u8; 16];
        let _ = archive.read_at(entry.name, entry.descriptor.data_length / 2, &mut buf);
    }
    let _ = archive.to_owned_entries();
}

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must only ever produce errors, never panics.
    exercise(data);

    // Most inputs die at the magic check; also try them behind a valid one.
    let mut framed = MAGIC.to_vec();
    framed.extend_from_slice(data);
    exercise(&framed);
});
