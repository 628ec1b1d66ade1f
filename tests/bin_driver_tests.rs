//! Binary driver scenarios against real native files

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

mod common;

use std::fs;
use strata::drivers::bin;
use std::cell::RefCell;
use strata::{BinReply, EventMask, FileEvent, IsolateConfig, Reply, Request};
use tempfile::TempDir;

/// A read larger than the file returns what exists; reading at EOF returns nothing
#[compio::test]
async fn test_read_past_end_is_short_then_empty() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("ten.bin");
    fs::write(&path, b"0123456789")?;
    let iso = common::isolate();

    let file = iso.file_new(iso.lookup(bin::READ_ONLY).expect("registered"), Some(path))?;

    let first = iso
        .submit(file.id(), Request::read(0, 1024))
        .expect("read accepted")
        .await;
    assert_eq!(first.into_data(), b"0123456789");

    let second = iso
        .submit(file.id(), Request::read(10, 1024))
        .expect("read accepted")
        .await;
    assert_eq!(
        second,
        Reply::Bin(BinReply::Read {
            offset: 10,
            data: Vec::new()
        })
    );
    Ok(())
}

/// Back-to-back reads queued before either runs share one native open
#[compio::test]
async fn test_back_to_back_reads_open_once() -> anyhow::Result<()> {
    let temp_dir = common::sample_tree();
    let iso = common::isolate();
    let file = iso.file_new(
        iso.lookup(bin::READ_ONLY).expect("registered"),
        Some(temp_dir.path().join("blob.bin")),
    )?;

    let head = iso
        .submit(file.id(), Request::read(0, 10))
        .expect("read accepted");
    let tail = iso
        .submit(file.id(), Request::read(1014, 100))
        .expect("read accepted");

    let blob = common::blob();
    assert_eq!(head.await.into_data(), &blob[..10]);
    assert_eq!(tail.await.into_data(), &blob[1014..]);
    assert_eq!(iso.stats().opens(), 1);
    assert_eq!(iso.stats().errors(), 0);
    Ok(())
}

/// A single read never returns more than the configured maximum
#[compio::test]
async fn test_cat_style_loop_respects_read_max() -> anyhow::Result<()> {
    let temp_dir = common::sample_tree();
    let iso = common::isolate_with(IsolateConfig {
        read_max: 100,
        ..IsolateConfig::default()
    });
    let file = iso.file_new(
        iso.lookup(bin::READ_ONLY).expect("registered"),
        Some(temp_dir.path().join("blob.bin")),
    )?;

    let mut out = Vec::new();
    let mut reads = 0;
    loop {
        let data = iso
            .submit(file.id(), Request::read(out.len() as u64, 4096))
            .expect("read accepted")
            .await
            .into_data();
        if data.is_empty() {
            break;
        }
        assert!(data.len() <= 100);
        out.extend_from_slice(&data);
        reads += 1;
    }
    assert_eq!(out, common::blob());
    assert_eq!(reads, 11);
    Ok(())
}

/// Writes land on disk and a native change resync picks up the new size
#[compio::test]
async fn test_write_then_native_growth() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("log.dat");
    fs::write(&path, b"")?;
    let iso = common::isolate();
    let file = iso.file_new(
        iso.lookup(bin::READ_WRITE).expect("registered"),
        Some(path.clone()),
    )?;

    let written = iso
        .submit(file.id(), Request::write(0, b"abc".to_vec()))
        .expect("write accepted")
        .await;
    assert_eq!(written.written(), 3);
    assert_eq!(fs::read(&path)?, b"abc");

    fs::write(&path, b"abcdef")?;
    iso.trigger(file.id(), FileEvent::UpdateNative);
    let data = iso
        .submit(file.id(), Request::read(0, 64))
        .expect("read accepted")
        .await
        .into_data();
    assert_eq!(data, b"abcdef");
    Ok(())
}

/// Variants refuse the direction they lack
#[compio::test]
async fn test_access_variants_gate_requests() -> anyhow::Result<()> {
    let temp_dir = common::sample_tree();
    let iso = common::isolate();
    let notes = temp_dir.path().join("notes.txt");

    let read_only = iso.file_new(iso.lookup(bin::READ_ONLY).expect("registered"), Some(notes.clone()))?;
    assert!(iso
        .submit(read_only.id(), Request::write(0, b"x".to_vec()))
        .is_none());

    let write_only = iso.file_new(iso.lookup(bin::WRITE_ONLY).expect("registered"), Some(notes))?;
    assert!(iso.submit(write_only.id(), Request::read(0, 1)).is_none());
    Ok(())
}

/// A vanished native file fails every queued read; restoring it and resyncing recovers
#[compio::test]
async fn test_reads_fail_while_native_file_is_missing() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("flaky.bin");
    fs::write(&path, b"payload")?;
    let iso = common::isolate();
    let file = iso.file_new(
        iso.lookup(bin::READ_ONLY).expect("registered"),
        Some(path.clone()),
    )?;

    // Let the size be known before the file goes away
    let (tx, rx) = futures::channel::oneshot::channel();
    let tx = RefCell::new(Some(tx));
    iso.watch_once(file.id(), EventMask::UPDATE, move |_, _| {
        if let Some(tx) = tx.borrow_mut().take() {
            let _ = tx.send(());
        }
    })?;
    iso.trigger(file.id(), FileEvent::UpdateNative);
    rx.await?;
    assert_eq!(bin::BinDriver::ctx(&iso, file.id()).expect("bin state").size(), 7);

    fs::remove_file(&path)?;
    let first = iso
        .submit(file.id(), Request::read(0, 64))
        .expect("read accepted");
    let second = iso
        .submit(file.id(), Request::read(0, 64))
        .expect("read accepted");
    assert!(first.await.into_data().is_empty());
    assert!(second.await.into_data().is_empty());
    assert!(iso.stats().errors() >= 1);
    assert!(!path.exists());

    fs::write(&path, b"restored")?;
    iso.trigger(file.id(), FileEvent::UpdateNative);
    let data = iso
        .submit(file.id(), Request::read(0, 64))
        .expect("read accepted")
        .await
        .into_data();
    assert_eq!(data, b"restored");
    Ok(())
}
