#![cfg(feature = "gzip")]

mod common;

use common::*;
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;
use unsquash::{Archive, Error, ExtractOptions};

/// The owner of `dir`, so extracted files need no chown
fn current_owner(dir: &Path) -> (u32, u32) {
    let meta = fs::metadata(dir).unwrap();
    (meta.uid(), meta.gid())
}

fn archive_for(dir: &Path, tree: &Tree) -> Archive<Vec<u8>> {
    let (uid, gid) = current_owner(dir);
    let image = ImageBuilder::new().owner(uid, gid).build(tree);
    Archive::with_logger(image, quiet_logger()).unwrap()
}

fn mode(path: &Path) -> u32 {
    fs::symlink_metadata(path).unwrap().permissions().mode() & 0o7777
}

fn options() -> ExtractOptions {
    ExtractOptions {
        threads: 2,
        ..ExtractOptions::default()
    }
}

/// One 8 byte file in a single block, an empty directory and a link to the file
fn scenario() -> Tree {
    dir(vec![
        ("file.txt", file_without_fragment(&b"hello!!!"[..])),
        ("emptydir", dir(vec![])),
        ("link", symlink("file.txt")),
    ])
}

#[test]
fn file_dir_and_symlink() {
    let tmp = tempfile::tempdir().unwrap();
    let archive = archive_for(tmp.path(), &scenario());
    let node = archive.root().lookup("file.txt").unwrap();
    let file = node.inode().as_file().unwrap();
    assert!(!file.has_fragment());
    assert_eq!(file.block_sizes.len(), 1);
    assert!(file.block_sizes[0].uncompressed());

    let out = tmp.path().join("out");
    let report = archive.root().extract_to(&out).unwrap();
    assert!(report.is_clean(), "{:?}", report);

    assert_eq!(fs::read(out.join("file.txt")).unwrap(), b"hello!!!");
    assert!(out.join("emptydir").is_dir());
    assert_eq!(fs::read_dir(out.join("emptydir")).unwrap().count(), 0);
    assert_eq!(
        fs::read_link(out.join("link")).unwrap(),
        Path::new("file.txt")
    );
    assert_eq!(fs::read(out.join("link")).unwrap(), b"hello!!!");
    assert_eq!(mode(&out.join("file.txt")), 0o644);
    assert_eq!(mode(&out.join("emptydir")), 0o755);
    assert_eq!(mode(&out), 0o755);
}

#[test]
fn scenario_aborts_on_any_failure() {
    for blocked in &["file.txt", "emptydir", "link"] {
        let tmp = tempfile::tempdir().unwrap();
        let archive = archive_for(tmp.path(), &dir(vec![("top", scenario())]));
        let out = tmp.path().join("out");
        let in_the_way = out.join("top").join(blocked);
        // A directory where a file or link goes, a file where the directory goes
        if *blocked == "emptydir" {
            fs::create_dir_all(out.join("top")).unwrap();
            fs::write(&in_the_way, b"x").unwrap();
        } else {
            fs::create_dir_all(in_the_way.join("occupied")).unwrap();
        }

        let result = archive.root().lookup("top").unwrap().extract_to(&out);
        match result {
            Err(Error::Extract { path, .. }) => assert_eq!(path, in_the_way),
            other => panic!("{}: unexpected {:?}", blocked, other),
        }
    }
}

#[test]
fn whole_sample() {
    let tmp = tempfile::tempdir().unwrap();
    let archive = archive_for(tmp.path(), &sample_tree());
    let out = tmp.path().join("deep/er/out");
    let report = archive.root().extract_with_options(&out, &options()).unwrap();
    assert!(report.is_clean(), "{:?}", report);

    let root = archive.root();
    for path in &[
        "hello.txt",
        "docs/big.bin",
        "docs/exact.bin",
        "docs/sparse.bin",
        "docs/tail.bin",
        "docs/nested/deep.txt",
    ] {
        let on_disk = fs::read(out.join(path)).unwrap();
        assert_eq!(on_disk, root.read_file(path).unwrap(), "{}", path);
    }
    assert!(out.join("empty").is_dir());

    assert_eq!(
        fs::read_link(out.join("abs")).unwrap(),
        Path::new("/docs/nested/deep.txt")
    );
    assert_eq!(fs::read_link(out.join("dangling")).unwrap(), Path::new("missing"));
    assert_eq!(fs::read_link(out.join("loop1")).unwrap(), Path::new("loop2"));
    assert!(!out.join("missing").exists());

    // Devices, fifos and sockets are left out
    assert!(fs::symlink_metadata(out.join("tty")).is_err());
    assert!(fs::symlink_metadata(out.join("pipe")).is_err());
}

#[test]
fn single_nodes() {
    let tmp = tempfile::tempdir().unwrap();
    let archive = archive_for(tmp.path(), &sample_tree());
    let root = archive.root();
    let out = tmp.path().join("out");

    root.lookup("hello.txt").unwrap().extract_to(&out).unwrap();
    assert_eq!(fs::read(out.join("hello.txt")).unwrap(), b"hello!!!");

    // Existing directories below the destination are reused
    root.lookup("docs").unwrap().extract_to(&out).unwrap();
    root.lookup("docs").unwrap().extract_to(&out).unwrap();
    assert_eq!(fs::read(out.join("docs/nested/deep.txt")).unwrap(), b"deep");

    let nested = tmp.path().join("nested_only");
    root.sub("docs/nested").unwrap().extract_to(&nested).unwrap();
    assert_eq!(fs::read(nested.join("deep.txt")).unwrap(), b"deep");
}

#[test]
fn refuses_non_empty_destination() {
    let tmp = tempfile::tempdir().unwrap();
    let archive = archive_for(tmp.path(), &sample_tree());
    let out = tmp.path().join("out");
    fs::create_dir(&out).unwrap();
    fs::write(out.join("existing"), b"x").unwrap();

    match archive.root().extract_to(&out) {
        Err(Error::Extract { path, source }) => {
            assert_eq!(path, out);
            assert_eq!(source.kind(), std::io::ErrorKind::AlreadyExists);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(!out.join("hello.txt").exists());
}

#[test]
fn empty_destination_is_used() {
    let tmp = tempfile::tempdir().unwrap();
    let archive = archive_for(tmp.path(), &sample_tree());
    let out = tmp.path().join("out");
    fs::create_dir(&out).unwrap();
    archive.root().extract_to(&out).unwrap();
    assert!(out.join("hello.txt").is_file());
}

/// `docs/nested` is taken by a regular file, and `docs/big.bin` by a directory
fn blocked_destination(out: &Path) {
    fs::create_dir_all(out.join("docs/big.bin")).unwrap();
    fs::write(out.join("docs/nested"), b"in the way").unwrap();
}

#[test]
fn stops_at_first_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let archive = archive_for(tmp.path(), &sample_tree());
    let out = tmp.path().join("out");
    blocked_destination(&out);

    let err = archive
        .root()
        .lookup("docs")
        .unwrap()
        .extract_with_options(&out, &options())
        .unwrap_err();
    match err {
        Error::Extract { path, .. } => {
            assert!(
                path == out.join("docs/nested") || path == out.join("docs/big.bin"),
                "{}",
                path.display()
            );
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(!out.join("docs/nested/deep.txt").exists());
}

#[test]
fn allow_errors_keeps_going() {
    let tmp = tempfile::tempdir().unwrap();
    let archive = archive_for(tmp.path(), &sample_tree());
    let out = tmp.path().join("out");
    blocked_destination(&out);

    let report = archive
        .root()
        .lookup("docs")
        .unwrap()
        .extract_with_options(
            &out,
            &ExtractOptions {
                allow_errors: true,
                ..options()
            },
        )
        .unwrap();
    assert_eq!(report.errors.len(), 2, "{:?}", report.errors);
    assert!(report
        .errors
        .iter()
        .all(|e| matches!(e, Error::Extract { .. })));
    assert!(!report.is_clean());
    assert_eq!(
        fs::read(out.join("docs/exact.bin")).unwrap(),
        pattern(2 * BLOCK_SIZE as usize, 4)
    );
    assert!(out.join("docs/tail.bin").is_file());
}

#[test]
fn dereference_symlinks() {
    let tmp = tempfile::tempdir().unwrap();
    let archive = archive_for(
        tmp.path(),
        &dir(vec![
            ("hello.txt", file(&b"hello!!!"[..])),
            ("sub", dir(vec![("inner.txt", file(&b"inner"[..]))])),
            ("link", symlink("hello.txt")),
            ("dirlink", symlink("sub")),
            ("dangling", symlink("missing")),
            ("loop1", symlink("loop2")),
            ("loop2", symlink("loop1")),
        ]),
    );
    let out = tmp.path().join("out");
    let report = archive
        .root()
        .extract_with_options(
            &out,
            &ExtractOptions {
                dereference: true,
                ..options()
            },
        )
        .unwrap();
    assert!(report.is_clean(), "{:?}", report);

    let link = out.join("link");
    assert!(fs::symlink_metadata(&link).unwrap().file_type().is_file());
    assert_eq!(fs::read(&link).unwrap(), b"hello!!!");

    let dirlink = out.join("dirlink");
    assert!(fs::symlink_metadata(&dirlink).unwrap().is_dir());
    assert_eq!(fs::read(dirlink.join("inner.txt")).unwrap(), b"inner");

    // Links which cannot be followed stay links
    assert_eq!(fs::read_link(out.join("dangling")).unwrap(), Path::new("missing"));
    assert_eq!(fs::read_link(out.join("loop1")).unwrap(), Path::new("loop2"));
}

#[test]
fn unbreak_extracts_link_targets() {
    let tmp = tempfile::tempdir().unwrap();
    let archive = archive_for(tmp.path(), &sample_tree());
    let root = archive.root();
    let out = tmp.path().join("out");
    let unbreak = ExtractOptions {
        unbreak: true,
        ..options()
    };

    root.lookup("link")
        .unwrap()
        .extract_with_options(&out, &unbreak)
        .unwrap();
    assert_eq!(fs::read_link(out.join("link")).unwrap(), Path::new("hello.txt"));
    assert_eq!(fs::read(out.join("hello.txt")).unwrap(), b"hello!!!");

    root.lookup("abs")
        .unwrap()
        .extract_with_options(&out, &unbreak)
        .unwrap();
    assert_eq!(fs::read(out.join("docs/nested/deep.txt")).unwrap(), b"deep");
    assert!(!out.join("docs/big.bin").exists());

    // Nothing to extract for links that lead nowhere
    let report = root
        .lookup("dangling")
        .unwrap()
        .extract_with_options(&out, &unbreak)
        .unwrap();
    assert!(report.is_clean());
    assert!(!out.join("missing").exists());
}

#[test]
fn unbreak_leaves_existing_targets_alone() {
    let tmp = tempfile::tempdir().unwrap();
    let archive = archive_for(tmp.path(), &sample_tree());
    let out = tmp.path().join("out");
    fs::create_dir(&out).unwrap();
    fs::write(out.join("hello.txt"), b"mine").unwrap();

    archive
        .root()
        .lookup("link")
        .unwrap()
        .extract_with_options(
            &out,
            &ExtractOptions {
                unbreak: true,
                ..options()
            },
        )
        .unwrap();
    assert_eq!(fs::read(out.join("hello.txt")).unwrap(), b"mine");
}

#[test]
fn read_only_directories_are_filled() {
    let tmp = tempfile::tempdir().unwrap();
    let archive = archive_for(
        tmp.path(),
        &Tree::Dir {
            entries: vec![(
                "locked".to_owned(),
                Tree::Dir {
                    entries: vec![("inside.txt".to_owned(), file(&b"inside"[..]))],
                    mode: 0o555,
                },
            )],
            mode: 0o755,
        },
    );
    let out = tmp.path().join("out");
    let report = archive.root().extract_to(&out).unwrap();
    assert!(report.is_clean(), "{:?}", report);

    let locked = out.join("locked");
    assert_eq!(mode(&locked), 0o555);
    assert_eq!(fs::read(locked.join("inside.txt")).unwrap(), b"inside");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
}

#[test]
fn file_modes_are_applied() {
    let tmp = tempfile::tempdir().unwrap();
    let archive = archive_for(
        tmp.path(),
        &dir(vec![
            (
                "script.sh",
                Tree::File {
                    data: b"#!/bin/sh\n".to_vec(),
                    fragment: true,
                    mode: 0o750,
                },
            ),
            (
                "secret",
                Tree::File {
                    data: b"s".to_vec(),
                    fragment: true,
                    mode: 0o600,
                },
            ),
        ]),
    );
    let out = tmp.path().join("out");
    archive.root().extract_to(&out).unwrap();
    assert_eq!(mode(&out.join("script.sh")), 0o750);
    assert_eq!(mode(&out.join("secret")), 0o600);
}
