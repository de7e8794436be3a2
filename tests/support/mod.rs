//! Shared test support: temp document roots and fd-limit manipulation.

pub mod fd_limit;

use std::fs;

use fileserved_core::fd::RootDir;

/// Builds the document root used by the end-to-end scenarios: `hello.txt`
/// (tiny, incompressible-enough to stay uncompressed), `big.bin` (20000
/// zero bytes, well past the in-memory threshold), `index.html` at the
/// root, and a `sub/` directory with a dotfile and one visible child so a
/// listing has something to exclude and something to show.
pub fn scenario_root() -> (tempfile::TempDir, RootDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("hello.txt"), b"hello\n").expect("write hello.txt");
    fs::write(dir.path().join("big.bin"), vec![0u8; 20_000]).expect("write big.bin");
    fs::write(dir.path().join("index.html"), b"<h1>root index</h1>").expect("write index.html");
    fs::create_dir(dir.path().join("sub")).expect("mkdir sub");
    fs::write(dir.path().join("sub/child.txt"), b"child\n").expect("write sub/child.txt");
    fs::write(dir.path().join("sub/.hidden"), b"secret\n").expect("write sub/.hidden");
    let root = RootDir::open(dir.path()).expect("open root");
    (dir, root)
}
