//! Path resolution across synchronized directories

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

mod common;

use rstest::rstest;
use std::fs;
use strata::drivers::{bin, syncdir};
use strata::{Category, FileEvent, Request, VfsError};

#[rstest]
#[case("a/b/deep.txt", 0)]
#[case("/a/b/deep.txt", 0)]
#[case("a//b/", 0)]
#[case("a/b/c", 1)]
#[case("a/missing/c", 9)]
#[case("skipped.xyz", 11)]
#[compio::test]
async fn test_remaining_bytes(#[case] vpath: &str, #[case] remaining: usize) {
    let temp_dir = common::sample_tree();
    let iso = common::isolate();
    common::mount(&iso, temp_dir.path());

    let found = iso.pathfind_root(vpath).await.expect("root is set");
    assert_eq!(found.remaining(), remaining, "{vpath}");
}

/// Every prefix of a resolved path resolves, and the deepest file is a directory
#[compio::test]
async fn test_partial_walk_stops_at_deepest_directory() -> anyhow::Result<()> {
    let temp_dir = common::sample_tree();
    let iso = common::isolate();
    let root = common::mount(&iso, temp_dir.path());

    let b = iso.pathfind(root, "a/b").await?.resolved().expect("a/b resolves");
    let found = iso.pathfind(root, "/a/b/c").await?;
    assert_eq!(found.base(), b.id());
    assert_eq!(found.remaining(), 1);
    assert!(iso.answers(found.base(), Category::Dir));
    Ok(())
}

/// Files picked by the default rules answer binary requests
#[compio::test]
async fn test_resolved_file_reads_native_contents() -> anyhow::Result<()> {
    let temp_dir = common::sample_tree();
    let iso = common::isolate();
    common::mount(&iso, temp_dir.path());

    let file = iso
        .pathfind_root("a/b/deep.txt")
        .await?
        .resolved()
        .expect("resolves");
    assert_eq!(
        iso.driver_of(file.id()).map(|d| d.name().to_string()),
        Some(bin::READ_WRITE.to_string())
    );
    let data = iso
        .submit(file.id(), Request::read(0, 64))
        .expect("binary file")
        .await
        .into_data();
    assert_eq!(data, b"deep\n");
    Ok(())
}

/// A native change is picked up after the directory is told about it
#[compio::test]
async fn test_native_change_visible_after_update() -> anyhow::Result<()> {
    let temp_dir = common::sample_tree();
    let iso = common::isolate();
    let root = common::mount(&iso, temp_dir.path());

    assert!(!iso.pathfind(root, "late.txt").await?.is_resolved());

    fs::write(temp_dir.path().join("late.txt"), b"late")?;
    assert!(
        !iso.pathfind(root, "late.txt").await?.is_resolved(),
        "no rescan without a native update"
    );

    iso.trigger(root, FileEvent::UpdateNative);
    assert!(iso.pathfind(root, "late.txt").await?.is_resolved());
    assert!(iso.stats().snapshot().scans >= 2);
    Ok(())
}

/// Clearing the root releases the mounted tree
#[compio::test]
async fn test_clear_root_tears_down_tree() -> anyhow::Result<()> {
    let temp_dir = common::sample_tree();
    let iso = common::isolate();
    let root = common::mount(&iso, temp_dir.path());

    let deep = iso
        .pathfind_root("a/b/deep.txt")
        .await?
        .resolved()
        .expect("resolves");
    let deep_id = deep.id();
    // Queued behind the initial stat, so the file is idle afterwards
    let _ = iso
        .submit(deep_id, Request::read(0, 1))
        .expect("binary file")
        .await;
    drop(deep);
    assert!(iso.file_count() > 1);

    iso.clear_root();
    assert!(!iso.exists(root));
    assert!(!iso.exists(deep_id));
    assert!(matches!(
        iso.pathfind_root("a").await,
        Err(VfsError::NoRoot)
    ));
    Ok(())
}

#[compio::test]
async fn test_syncdir_requires_native_path() {
    let iso = common::isolate();
    let driver = iso.lookup(syncdir::NAME).expect("registered");
    assert!(matches!(
        iso.file_new(driver, None),
        Err(VfsError::MissingNativePath(_))
    ));
}
