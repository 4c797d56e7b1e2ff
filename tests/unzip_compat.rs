use libris_archive::{CompressionPolicy, Container, ContainerHandle, EngineConfig};
use std::process::Command;
use tempfile::tempdir;

// Builds a container through add-or-replace rewrites (new file, appends, an
// in-place replace) and then calls `unzip -t` to verify compatibility.
// If `unzip` is not present on the system, the test will be skipped.

#[test]
fn unzip_compatibility() {
    let check = Command::new("unzip").arg("-v").output();
    if check.is_err() {
        eprintln!("skipping test: `unzip` not found");
        return;
    }

    let dir = tempdir().unwrap();
    let path = dir.path().join("compat.epub");
    let book = Container::open(ContainerHandle::from_path(&path), EngineConfig::default()).unwrap();

    book.add_or_replace("mimetype", b"application/epub+zip".to_vec(), CompressionPolicy::Store)
        .unwrap();
    book.add_or_replace("OEBPS/ch1.xhtml", b"<p>draft</p>".to_vec(), CompressionPolicy::Auto)
        .unwrap();
    book.add_or_replace("OEBPS/images/cover.jpg", vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3], CompressionPolicy::Auto)
        .unwrap();
    book.add_or_replace("OEBPS/big.bin", vec![0u8; 1024 * 1024], CompressionPolicy::Deflate)
        .unwrap();
    book.add_or_replace("OEBPS/ch1.xhtml", b"<p>final</p>".to_vec(), CompressionPolicy::Auto)
        .unwrap();
    book.add_or_replace("OEBPS/Text/café.xhtml", b"<p>caf\xc3\xa9</p>".to_vec(), CompressionPolicy::Auto)
        .unwrap();

    let output = Command::new("unzip")
        .arg("-t")
        .arg(&path)
        .output()
        .expect("failed to run unzip");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(
        output.status.success(),
        "unzip reported failure: {} {}",
        stdout,
        stderr
    );
}
