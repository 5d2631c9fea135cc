#![no_main]
use libfuzzer_sys::fuzz_target;
use ktiy::format::{decoder, encoder};

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    // First byte picks how many entries the rest is split into.
    let count = (data[0] % 16) as usize + 1;
    let payload = &data[1..];
    let chunk = payload.len() / count + 1;

    let entries: Vec<(Vec<u8>, Vec<u8>)> = payload
        .chunks(chunk)
        .enumerate()
        .map(|(i, c)| (format!("entry-{i}").into_bytes(), c.to_vec()))
        .collect();

    let bytes = encoder::encode_to_vec(entries.iter().map(|(n, c)| (n, c))).unwrap();
    let decoded = decoder::decode_all(&bytes).unwrap();
    assert_eq!(decoded, entries);
});
