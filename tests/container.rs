use std::collections::HashSet;
use std::fs;
use std::io::Read;

use anyhow::Result;

use tmod::read::Identity;
use tmod::*;

mod common;
use common::*;

#[test]
fn read_example() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let big = big_data();
    let fixture = example(&big);
    let path = fixture.write_to(dir.path(), "ExampleMod.tmod");

    let tmod = TmodFile::new(path.clone());
    assert_eq!(tmod.name(), None);

    let mut guard = tmod.open()?;
    assert!(tmod.is_open());
    assert_eq!(tmod.name().as_deref(), Some("ExampleMod"));
    assert_eq!(tmod.version(), Some(Version::new(1, 0)));
    assert_eq!(
        tmod.tmodloader_version(),
        Some("2022.9.47.16".parse().unwrap())
    );
    assert_eq!(tmod.signature(), Some([0x5A; 256]));

    let entries = tmod.entries();
    let names: Vec<&str> = entries.iter().map(|e| e.name()).collect();
    assert_eq!(names, ["Info", "data.bin"]);

    let info = &entries[0];
    assert!(!info.is_compressed());
    assert_eq!(info.length(), 5);
    let data = &entries[1];
    assert!(data.is_compressed());
    assert_eq!(data.length() as usize, big.len());
    assert!(data.stored_length() < data.length());

    // Offsets follow the table, back to back.
    let file_len = fs::metadata(&path)?.len();
    assert_eq!(data.offset(), Some(info.offset().unwrap() + 5));
    assert_eq!(
        data.offset().unwrap() + u64::from(data.stored_length()),
        file_len
    );

    let mut reader = tmod.get_stream("Info", false)?;
    let mut contents = Vec::new();
    reader.read_to_end(&mut contents)?;
    reader.close()?;
    assert_eq!(contents, INFO);

    let mut reader = tmod.get_stream("data.bin", false)?;
    let mut contents = Vec::new();
    reader.read_to_end(&mut contents)?;
    reader.close()?;
    assert_eq!(contents, big);

    guard.close()?;
    assert!(!tmod.is_open());
    assert_eq!(tmod.open_count(), 0);

    // Header state survives the close.
    assert_eq!(tmod.name().as_deref(), Some("ExampleMod"));
    assert_eq!(tmod.entry_count(), 2);
    Ok(())
}

#[test]
fn get_bytes_round_trips() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let big = big_data();
    let path = example(&big).write_to(dir.path(), "ExampleMod.tmod");

    let tmod = TmodFile::new(path);
    let _guard = tmod.open()?;
    for entry in tmod.entries() {
        let bytes = tmod.get_bytes(&entry)?;
        assert_eq!(bytes.len(), entry.length() as usize);
        let restored = if entry.is_compressed() {
            deflate(&bytes).len()
        } else {
            bytes.len()
        };
        assert_eq!(restored, entry.stored_length() as usize);
    }
    assert_eq!(&*tmod.get_bytes_by_name("data.bin")?, big.as_slice());
    Ok(())
}

#[test]
fn nested_opens() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let big = big_data();
    let path = example(&big).write_to(dir.path(), "ExampleMod.tmod");

    let tmod = TmodFile::new(path);
    let mut outer = tmod.open()?;
    {
        let _inner = tmod.open()?;
        assert_eq!(tmod.open_count(), 2);
        assert_eq!(&*tmod.get_bytes_by_name("Info")?, INFO);
    }
    assert_eq!(tmod.open_count(), 1);
    assert!(tmod.is_open());

    outer.close()?;
    assert!(!tmod.is_open());

    // Closing again does nothing.
    outer.close()?;
    assert_eq!(tmod.open_count(), 0);
    Ok(())
}

#[test]
fn corrupt_payload() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let big = big_data();
    let fixture = example(&big);
    let good = fixture.build();

    for i in [
        fixture.header_len(),
        fixture.header_len() + 20,
        good.len() / 2,
        good.len() - 1,
    ] {
        let mut bad = good.clone();
        bad[i] ^= 0x01;
        let path = dir.path().join(format!("corrupt-{}.tmod", i));
        fs::write(&path, &bad)?;

        let tmod = TmodFile::new(path.to_str().unwrap());
        match tmod.open() {
            Err(TmodError::HashMismatch { .. }) => {}
            Err(other) => panic!("Flipping byte {} gave {:?}", i, other),
            Ok(_) => panic!("Flipping byte {} went unnoticed", i),
        }
        assert_eq!(tmod.entry_count(), 0);
        assert!(!tmod.has_file("Info"));
        assert_eq!(tmod.name(), None);
        assert!(!tmod.is_open());
        assert_eq!(tmod.open_count(), 0);
    }
    Ok(())
}

#[test]
fn bad_magic() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let big = big_data();
    let mut bytes = example(&big).build();
    bytes[..4].copy_from_slice(b"TMOF");
    let path = dir.path().join("bad.tmod");
    fs::write(&path, &bytes)?;

    let tmod = TmodFile::new(path.to_str().unwrap());
    assert!(matches!(tmod.open(), Err(TmodError::InvalidMagic)));
    assert!(!tmod.is_open());
    Ok(())
}

#[test]
fn truncated_header() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let big = big_data();
    let bytes = example(&big).build();
    let path = dir.path().join("short.tmod");
    fs::write(&path, &bytes[..100])?;

    let tmod = TmodFile::new(path.to_str().unwrap());
    assert!(matches!(tmod.open(), Err(TmodError::Io(_))));
    assert_eq!(tmod.open_count(), 0);
    Ok(())
}

#[test]
fn legacy_versions_have_no_entries() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let big = big_data();
    let mut fixture = example(&big);
    fixture.tmodloader_version = "0.10.1.5";
    let path = fixture.write_to(dir.path(), "Old.tmod");

    let tmod = TmodFile::new(path);
    let mut guard = tmod.open()?;
    assert_eq!(tmod.tmodloader_version(), Some("0.10.1.5".parse().unwrap()));
    assert_eq!(tmod.entry_count(), 0);
    assert_eq!(tmod.name(), None);
    guard.close()?;
    Ok(())
}

#[test]
fn unknown_entry() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let big = big_data();
    let path = example(&big).write_to(dir.path(), "ExampleMod.tmod");

    let tmod = TmodFile::new(path);
    let mut guard = tmod.open()?;
    match tmod.get_stream("nope.txt", false) {
        Err(TmodError::NoSuchEntry(name)) => assert_eq!(name.as_str(), "nope.txt"),
        other => panic!("Expected NoSuchEntry, got {:?}", other),
    }
    // Nothing else changed.
    assert_eq!(&*tmod.get_bytes_by_name("Info")?, INFO);
    guard.close()?;
    Ok(())
}

#[test]
fn backslashes_are_normalized() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let fixture = Fixture::new(vec![stored("Assets\\Textures\\icon.rawimg", b"pixels")]);
    let path = fixture.write_to(dir.path(), "Slashes.tmod");

    let tmod = TmodFile::new(path);
    let _guard = tmod.open()?;
    assert_eq!(tmod.entries()[0].name(), "Assets/Textures/icon.rawimg");
    assert!(tmod.has_file("Assets\\Textures\\icon.rawimg"));
    assert_eq!(
        &*tmod.get_bytes_by_name("Assets/Textures/icon.rawimg")?,
        b"pixels"
    );
    Ok(())
}

#[test]
fn duplicate_names_last_wins() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let fixture = Fixture::new(vec![
        stored("dup", b"first"),
        stored("other", b"x"),
        stored("dup", b"second"),
    ]);
    let path = fixture.write_to(dir.path(), "Dup.tmod");

    let tmod = TmodFile::new(path);
    let _guard = tmod.open()?;
    let names: Vec<_> = tmod.entries().iter().map(|e| e.name().to_owned()).collect();
    assert_eq!(names, ["dup", "other", "dup"]);
    assert_eq!(&*tmod.get_bytes_by_name("dup")?, b"second");
    Ok(())
}

#[test]
fn wrong_table_lengths_are_caught() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let big = big_data();
    let fixture = Fixture::new(vec![
        deflated("long.bin", &big).with_length(big.len() as u32 + 1),
        deflated("short.bin", &big).with_length(big.len() as u32 - 1),
    ]);
    let path = fixture.write_to(dir.path(), "Lengths.tmod");

    let tmod = TmodFile::new(path);
    let mut guard = tmod.open()?;
    for name in ["long.bin", "short.bin"] {
        assert!(tmod.entry(name)?.is_compressed());
        match tmod.get_bytes_by_name(name) {
            Err(TmodError::InvalidArchive(_)) => {}
            other => panic!("Expected a length mismatch for {}, got {:?}", name, other),
        }
    }
    // The failed reads didn't leave a stream behind.
    guard.close()?;
    assert!(!tmod.is_open());
    Ok(())
}

#[test]
fn declared_payload_length_is_advisory() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let big = big_data();
    let mut fixture = example(&big);
    fixture.declared_payload_length = Some(7);
    let path = fixture.write_to(dir.path(), "Lies.tmod");

    let tmod = TmodFile::new(path);
    let _guard = tmod.open()?;
    assert_eq!(tmod.declared_payload_length(), Some(7));
    assert_eq!(&*tmod.get_bytes_by_name("data.bin")?, big.as_slice());
    Ok(())
}

#[test]
fn reopen_checks_hash() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let big = big_data();
    let path = example(&big).write_to(dir.path(), "ExampleMod.tmod");

    let tmod = TmodFile::new(path.clone());
    tmod.open()?.close()?;
    let offsets: Vec<_> = tmod.entries().iter().map(|e| e.offset()).collect();

    // Same file: reopening keeps the table as-is.
    tmod.open()?.close()?;
    let reopened: Vec<_> = tmod.entries().iter().map(|e| e.offset()).collect();
    assert_eq!(offsets, reopened);

    // Different file at the same path
    Fixture::new(vec![stored("Info", b"changed")]).write_to(dir.path(), "ExampleMod.tmod");
    assert!(matches!(
        tmod.open(),
        Err(TmodError::FileModified { .. })
    ));
    assert!(!tmod.is_open());
    assert_eq!(tmod.entry_count(), 2);
    Ok(())
}

#[test]
fn open_with_known_identity() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let big = big_data();
    let path = example(&big).write_to(dir.path(), "ExampleMod.tmod");

    let first = TmodFile::new(path.clone());
    first.open()?.close()?;
    let identity = first.identity().unwrap();

    let known = TmodFile::with_identity(path.clone(), identity.clone());
    known.open()?.close()?;
    assert_eq!(known.name().as_deref(), Some("ExampleMod"));
    assert_eq!(known.hash(), Some(identity.hash));
    assert_eq!(known.entry_count(), 0);

    let stale = TmodFile::with_identity(
        path,
        Identity {
            hash: [0; 20],
            ..identity
        },
    );
    assert!(matches!(
        stale.open(),
        Err(TmodError::FileModified { .. })
    ));
    Ok(())
}

#[test]
fn streams_need_an_open_container() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let big = big_data();
    let path = example(&big).write_to(dir.path(), "ExampleMod.tmod");

    let tmod = TmodFile::new(path);
    tmod.open()?.close()?;
    assert!(matches!(
        tmod.get_stream("Info", false),
        Err(TmodError::NotOpen(_))
    ));
    assert!(matches!(
        tmod.get_stream("Info", true),
        Err(TmodError::NotOpen(_))
    ));
    Ok(())
}

#[test]
fn cached_entries() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let big = big_data();
    let fixture = Fixture::new(vec![
        stored("Info", INFO),
        deflated("data.bin", &big),
        stored("skipped", b"not cached"),
        stored("huge", &big),
    ]);
    let path = fixture.write_to(dir.path(), "Cache.tmod");

    let config = ReaderConfig {
        max_cache_size: 50_000,
        ..ReaderConfig::default()
    };
    let tmod = TmodFile::with_config(path, config);
    tmod.open()?.close()?;

    let skip: HashSet<String> = ["skipped".to_owned()].into_iter().collect();
    tmod.cache_files(&skip)?;
    assert!(!tmod.is_open());

    assert!(tmod.entry("Info")?.is_cached());
    assert!(tmod.entry("data.bin")?.is_cached());
    assert!(!tmod.entry("skipped")?.is_cached());
    assert!(!tmod.entry("huge")?.is_cached());

    // Cached entries read without the file open, compressed or not.
    assert_eq!(&*tmod.get_bytes_by_name("Info")?, INFO);
    assert_eq!(&*tmod.get_bytes_by_name("data.bin")?, big.as_slice());
    assert!(matches!(
        tmod.get_bytes_by_name("skipped"),
        Err(TmodError::NotOpen(_))
    ));

    tmod.remove_from_cache("Info")?;
    assert!(!tmod.entry("Info")?.is_cached());
    assert!(matches!(
        tmod.get_bytes_by_name("Info"),
        Err(TmodError::NotOpen(_))
    ));

    tmod.reset_cache();
    assert!(!tmod.entry("data.bin")?.is_cached());
    Ok(())
}

#[test]
fn load_local_mod() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;

    let mut info = Vec::new();
    for s in ["author", "Someone", "version", "0.3.1", "modReferences", "Dep@1.2", "", "side"] {
        info.push(s.len() as u8);
        info.extend_from_slice(s.as_bytes());
    }
    info.push(1);
    info.push(0);

    let code = vec![0xC0u8; 4096];
    let fixture = Fixture::new(vec![stored("Info", &info), deflated("ExampleMod.dll", &code)]);
    let path = fixture.write_to(dir.path(), "ExampleMod.tmod");

    let local = LocalMod::load(path)?;
    assert_eq!(local.name(), "ExampleMod");
    assert_eq!(local.to_string(), "ExampleMod");
    assert!(!local.file.is_open());
    assert_eq!(local.properties.author, "Someone");
    assert_eq!(local.properties.version, Version::with_build(0, 3, 1));
    assert_eq!(local.properties.mod_references[0].to_string(), "Dep@1.2");
    assert_eq!(local.properties.side, properties::ModSide::Client);
    Ok(())
}
