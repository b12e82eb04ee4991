//! Kernel mount tests. These need `/dev/fuse` and `fusermount3`, so they
//! are ignored by default: `cargo test -- --ignored` on a FUSE-capable host.

use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use zipfs::{CombinerConfig, Error, Mount, MountOptions, MountState};

fn hi_zip() -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    {
        let mut w = zip::ZipWriter::new(&mut out);
        let opts = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        w.start_file("dirA/dirB/hello", opts).unwrap();
        w.write_all(b"salutations\n").unwrap();
        w.finish().unwrap();
    }
    out.into_inner()
}

async fn read_file(path: PathBuf) -> std::io::Result<String> {
    tokio::task::spawn_blocking(move || std::fs::read_to_string(path))
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ignore = "requires FUSE"]
async fn mounted_zip_reads_through_the_kernel() {
    let dir = tempfile::tempdir().unwrap();
    let zip = dir.path().join("hi.zip");
    std::fs::write(&zip, hi_zip()).unwrap();
    let mp = dir.path().join("mnt");
    std::fs::create_dir(&mp).unwrap();

    let mut mount = Mount::new(&zip, &mp);
    mount.start().await.unwrap();
    assert_eq!(mount.state(), MountState::Mounted);

    let hello = read_file(mp.join("dirA/dirB/hello")).await.unwrap();
    assert_eq!(hello, "salutations\n");

    let listing = {
        let mp = mp.clone();
        tokio::task::spawn_blocking(move || {
            std::fs::read_dir(mp.join("dirA"))
                .unwrap()
                .map(|e| e.unwrap().file_name().into_string().unwrap())
                .collect::<Vec<_>>()
        })
        .await
        .unwrap()
    };
    assert_eq!(listing, ["dirB"]);

    let write = {
        let target = mp.join("dirA/new");
        tokio::task::spawn_blocking(move || std::fs::write(target, b"nope"))
            .await
            .unwrap()
    };
    assert!(write.is_err());

    assert!(read_file(mp.join("missing")).await.is_err());

    mount.stop().await.unwrap();
    assert_eq!(mount.state(), MountState::Unmounted);
    assert!(!mp.join("dirA").exists());

    // A stopped mount cannot be restarted.
    assert!(mount.start().await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires FUSE"]
async fn combined_file_mounts_and_serves_concurrent_readers() {
    let dir = tempfile::tempdir().unwrap();
    let exe = dir.path().join("app");
    let zip = dir.path().join("hi.zip");
    let combined = dir.path().join("app.combined");
    std::fs::write(&exe, b"#!/bin/sh\necho pretend\n").unwrap();
    std::fs::write(&zip, hi_zip()).unwrap();
    zipfs::combine(&CombinerConfig {
        output_path: combined.clone(),
        executable_path: exe,
        zipfile_path: zip,
        split: false,
    })
    .unwrap();

    let mp = dir.path().join("mnt");
    std::fs::create_dir(&mp).unwrap();
    let mut mount = Mount::from_combined(&combined, &mp).unwrap();
    mount.start().await.unwrap();

    let readers: Vec<_> = (0..16)
        .map(|_| tokio::spawn(read_file(mp.join("dirA/dirB/hello"))))
        .collect();
    for reader in readers {
        assert_eq!(reader.await.unwrap().unwrap(), "salutations\n");
    }

    mount.stop().await.unwrap();
}

/// Deflated member big enough that inflating it takes a noticeable while.
fn slow_zip() -> Vec<u8> {
    let mut state = 0x2545_f491_4f6c_dd1du64;
    let body: Vec<u8> = (0..48 << 20)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            b"abcdefgh"[(state & 7) as usize]
        })
        .collect();
    let mut out = Cursor::new(Vec::new());
    {
        let mut w = zip::ZipWriter::new(&mut out);
        let opts = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        w.start_file("big.bin", opts).unwrap();
        w.write_all(&body).unwrap();
        w.finish().unwrap();
    }
    out.into_inner()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ignore = "requires FUSE"]
async fn stop_reports_requests_that_do_not_drain() {
    let dir = tempfile::tempdir().unwrap();
    let zip = dir.path().join("slow.zip");
    std::fs::write(&zip, slow_zip()).unwrap();
    let mp = dir.path().join("mnt");
    std::fs::create_dir(&mp).unwrap();

    let options = MountOptions {
        drain_timeout: Duration::ZERO,
        ..MountOptions::default()
    };
    let mut mount = Mount::new(&zip, &mp).with_options(options);
    mount.start().await.unwrap();

    let target = mp.join("big.bin");
    let reader = tokio::task::spawn_blocking(move || std::fs::read(target));

    let deadline = Instant::now() + Duration::from_secs(10);
    while mount.in_flight() == 0 {
        assert!(Instant::now() < deadline, "read never reached the filesystem");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let err = mount.stop().await.unwrap_err();
    assert!(matches!(err, Error::Unmount { .. }), "{err}");
    assert_eq!(mount.state(), MountState::Unmounted);

    // The reader finishes one way or another once the session winds down.
    let _ = tokio::time::timeout(Duration::from_secs(30), reader).await;
}
