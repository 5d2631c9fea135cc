use ktiy::format::{Archive, DecodeError, HEADER_LEN, decoder, encoder};

#[derive(Debug)]
struct Vector {
    name: &'static str,
    entries: &'static [(&'static str, &'static str)],
    encoded_hex: &'static str,
}

const VECTORS: &[Vector] = &[
    Vector {
        name: "empty",
        entries: &[],
        encoded_hex: concat!("4b54495900000000", "0000000000000000", "0000000000000000"),
    },
    Vector {
        name: "two_entries",
        entries: &[("test", "hi"), ("silly", "lo")],
        encoded_hex: concat!(
            "4b54495900000000",
            "0200000000000000",
            "0b00000000000000",
            "000000000000000000000000000000000200000000000000",
            "050000000000000002000000000000000200000000000000",
            "746573740073696c6c7900",
            "68696c6f",
        ),
    },
    Vector {
        name: "empty_content",
        entries: &[("a", ""), ("b", "x")],
        encoded_hex: concat!(
            "4b54495900000000",
            "0200000000000000",
            "0400000000000000",
            "000000000000000000000000000000000000000000000000",
            "020000000000000000000000000000000100000000000000",
            "61006200",
            "78",
        ),
    },
];

fn hex_to_bytes(s: &str) -> Vec<u8> {
    let s = s.trim();
    if s.is_empty() {
        return Vec::new();
    }
    assert!(
        s.len().is_multiple_of(2),
        "hex string must have even length"
    );
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
        .collect()
}

#[test]
fn vector_table_is_non_empty() {
    assert!(!VECTORS.is_empty());
}

#[test]
fn encode_matches_all_vectors() {
    for v in VECTORS {
        let encoded = encoder::encode_to_vec(v.entries.iter().copied()).unwrap();
        assert_eq!(encoded, hex_to_bytes(v.encoded_hex), "vector {}", v.name);
    }
}

#[test]
fn decode_matches_all_vectors() {
    for v in VECTORS {
        let bytes = hex_to_bytes(v.encoded_hex);
        let decoded = decoder::decode_all(&bytes)
            .unwrap_or_else(|e| panic!("vector {}: {e}", v.name));
        let expected: Vec<(Vec<u8>, Vec<u8>)> = v
            .entries
            .iter()
            .map(|(n, c)| (n.as_bytes().to_vec(), c.as_bytes().to_vec()))
            .collect();
        assert_eq!(decoded, expected, "vector {}", v.name);
    }
}

#[test]
fn two_entry_scenario_lookups() {
    let bytes = encoder::encode_to_vec([("test", "hi"), ("silly", "lo")]).unwrap();
    let archive = Archive::parse(&bytes).unwrap();

    assert_eq!(archive.header().entry_count, 2);
    assert_eq!(archive.header().string_table_size, 11);
    assert_eq!(archive.string_table(), b"test\0silly\0");

    let d = archive.descriptors();
    assert_eq!(
        (d[0].name_offset, d[0].data_offset, d[0].data_length),
        (0, 0, 2)
    );
    assert_eq!(
        (d[1].name_offset, d[1].data_offset, d[1].data_length),
        (5, 2, 2)
    );

    assert_eq!(archive.get("test"), Some(&b"hi"[..]));
    assert_eq!(archive.get("silly"), Some(&b"lo"[..]));
    assert_eq!(archive.get("missing"), None);
}

#[test]
fn fixture_shaped_archive() {
    // Same shape as the boot fixture: short text files plus one large blob.
    let big = "Lorem ipsum dolor sit amet. ".repeat(400);
    let entries = [
        ("test", "this is a text file saved in my initrd file :3"),
        ("silly", "blehhh :p"),
        ("big", big.as_str()),
    ];
    let bytes = encoder::encode_to_vec(entries).unwrap();
    let archive = Archive::parse(&bytes).unwrap();

    assert_eq!(archive.len(), 3);
    assert_eq!(archive.header().string_table_size, 5 + 6 + 4);
    let d = archive.descriptors();
    assert_eq!(d[2].name_offset, 11);
    assert_eq!(
        d[2].data_offset,
        (entries[0].1.len() + entries[1].1.len()) as u64
    );
    assert_eq!(archive.get("big"), Some(big.as_bytes()));
    assert_eq!(
        bytes.len(),
        HEADER_LEN + 3 * 24 + 15 + entries.iter().map(|(_, c)| c.len()).sum::<usize>()
    );
}

#[test]
fn foreign_magic_is_rejected() {
    let mut bytes = hex_to_bytes(VECTORS[1].encoded_hex);
    bytes[..4].copy_from_slice(b"\x07\x07\x01\x00");
    assert!(matches!(
        Archive::parse(&bytes),
        Err(DecodeError::BadMagic { .. })
    ));
}
