use std::fs;
use std::path::Path;
use strata::{drivers, FileId, Isolate, IsolateConfig};
use tempfile::TempDir;

/// Isolate with every builtin driver registered
#[allow(dead_code)]
pub fn isolate() -> Isolate {
    isolate_with(IsolateConfig::default())
}

#[allow(dead_code)]
pub fn isolate_with(config: IsolateConfig) -> Isolate {
    let iso = Isolate::new(config);
    drivers::register_builtin(&iso).expect("builtin drivers register once");
    iso
}

/// Native tree shared by most scenarios
///
/// ```text
/// blob.bin      1024 bytes, byte i = i % 251
/// notes.txt     "hello strata\n"
/// a/b/deep.txt  "deep\n"
/// skipped.xyz   no matching rule
/// ```
#[allow(dead_code)]
pub fn sample_tree() -> TempDir {
    let temp_dir = TempDir::new().expect("temp dir");
    write_sample_tree(temp_dir.path());
    temp_dir
}

#[allow(dead_code)]
pub fn write_sample_tree(root: &Path) {
    fs::write(root.join("blob.bin"), blob()).expect("write blob");
    fs::write(root.join("notes.txt"), b"hello strata\n").expect("write notes");
    fs::create_dir_all(root.join("a").join("b")).expect("create a/b");
    fs::write(root.join("a").join("b").join("deep.txt"), b"deep\n").expect("write deep");
    fs::write(root.join("skipped.xyz"), b"?").expect("write skipped");
}

/// Contents of `blob.bin`
#[allow(dead_code)]
pub fn blob() -> Vec<u8> {
    (0..1024u32).map(|i| (i % 251) as u8).collect()
}

/// Mount `path` as a synchronized directory and make it the isolate root
#[allow(dead_code)]
pub fn mount(iso: &Isolate, path: &Path) -> FileId {
    let root = iso.mount_native(path).expect("mount root");
    let id = root.id();
    iso.set_root(root);
    id
}
