use ktiy::format::{Archive, ArchiveBuilder};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut builder = ArchiveBuilder::new();
    builder
        .add("test", "this is a text file saved in my initrd file :3")?
        .add("silly", "blehhh :p")?;

    let bytes = builder.to_vec()?;
    let archive = Archive::parse(&bytes)?;

    for entry in &archive {
        println!(
            "{:<8} {:>4} bytes at data offset {}",
            entry.name.escape_ascii(),
            entry.content.len(),
            entry.descriptor.data_offset
        );
    }
    assert_eq!(archive.get("silly"), Some(&b"blehhh :p"[..]));

    println!(
        "archive is {} bytes for {} entries",
        bytes.len(),
        archive.len()
    );
    Ok(())
}
