use fitsio::images::{ImageDescription, ImageType};
use fitsio::FitsFile;
use std::fs;
use std::path::{Path, PathBuf};

use fits_catalog::config::TableNames;
use fits_catalog::fits::extract::hash_file;
use fits_catalog::pipeline::discover::Discovery;
use fits_catalog::pipeline::mover::Mover;
use fits_catalog::pipeline::restore::Restorer;
use fits_catalog::progress::Silent;
use fits_catalog::state::library::WriteMode;
use fits_catalog::{Config, Library};

/// A blank 8-bit LIGHT frame; `tag` makes the content unique
fn write_fits(dir: &Path, name: &str, object: &str, tag: &str) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    let (width, height) = (4656, 2);
    let description = ImageDescription {
        data_type: ImageType::UnsignedByte,
        dimensions: &[height, width],
    };
    let mut fptr = FitsFile::create(&path)
        .with_custom_primary(&description)
        .open()
        .unwrap();
    let hdu = fptr.primary_hdu().unwrap();
    hdu.write_image(&mut fptr, &vec![0u8; width * height]).unwrap();

    hdu.write_key(&mut fptr, "IMAGETYP", "LIGHT").unwrap();
    hdu.write_key(&mut fptr, "OBJECT", object).unwrap();
    hdu.write_key(&mut fptr, "FILTER", "Lum").unwrap();
    hdu.write_key(&mut fptr, "FOCALLEN", 480i64).unwrap();
    hdu.write_key(&mut fptr, "EXPOSURE", 300.0f64).unwrap();
    hdu.write_key(&mut fptr, "DATE-OBS", "2024-03-02T13:00:00").unwrap();
    hdu.write_key(&mut fptr, "FIXTURE", tag).unwrap();
    path
}

struct Workspace {
    _dir: tempfile::TempDir,
    config: Config,
    library: Library,
}

fn workspace() -> Workspace {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.quarantine_dir = dir.path().join("quarantine");
    config.image_dir = dir.path().join("library");
    config.restore_dir = dir.path().join("restore");
    fs::create_dir_all(&config.quarantine_dir).unwrap();
    let library = Library::open_in_memory(TableNames::default()).unwrap();
    Workspace {
        _dir: dir,
        config,
        library,
    }
}

#[test]
fn test_discovery_stages_unique_frames_and_purges_bad() {
    let ws = workspace();
    let q = &ws.config.quarantine_dir;
    let first = write_fits(q, "m31_001.fits", "M31", "first");
    write_fits(q, "m31_002.fits", "M31", "second");
    fs::copy(&first, q.join("m31_003.fits")).unwrap();
    let bad = write_fits(q, "BAD_m31_004.fits", "M31", "blurry");

    let report = Discovery::new(&ws.config)
        .run(&ws.library, q, &mut Silent)
        .unwrap();

    assert_eq!(report.records.len(), 2);
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.bad_files, vec![bad.clone()]);
    assert_eq!(report.purged, vec![bad.clone()]);
    assert!(report.purge_failures.is_empty());
    assert!(!bad.exists());
    let names: Vec<&str> = report.records.iter().map(|r| r.file.as_str()).collect();
    assert_eq!(names, vec!["m31_001.fits", "m31_002.fits"]);
    assert_eq!(report.records[0].filter, "L");
}

#[test]
fn test_discovery_is_idempotent_after_commit() {
    let ws = workspace();
    let q = &ws.config.quarantine_dir;
    write_fits(q, "a.fits", "M42", "a");
    write_fits(q, "b.fits", "M42", "b");

    let first = Discovery::new(&ws.config).run(&ws.library, q, &mut Silent).unwrap();
    ws.library.write_staged(&first.records).unwrap();
    ws.library.merge_staged().unwrap();

    let second = Discovery::new(&ws.config).run(&ws.library, q, &mut Silent).unwrap();
    assert_eq!(first.records.len(), 2);
    assert!(second.records.is_empty());
    assert_eq!(second.duplicates, 2);
}

#[test]
fn test_commit_then_revert_restores_every_file() {
    let ws = workspace();
    let q = &ws.config.quarantine_dir;
    let originals = vec![
        write_fits(&q.join("night1"), "m42_1.fits", "M42", "one"),
        write_fits(&q.join("night1"), "m42_2.fits", "M42", "two"),
        write_fits(&q.join("night2"), "ngc7000.fits", "NGC7000", "three"),
    ];
    let hashes: Vec<String> = originals.iter().map(|p| hash_file(p).unwrap()).collect();

    let staged = Discovery::new(&ws.config).run(&ws.library, q, &mut Silent).unwrap();
    ws.library.write_staged(&staged.records).unwrap();
    let mover = Mover::new(&ws.library, &ws.config);

    let committed = mover.commit(&mut Silent).unwrap();
    assert_eq!(committed.merged, 3);
    assert!(originals.iter().all(|p| !p.exists()));
    let placed = ws.library.load_library().unwrap();
    assert_eq!(
        placed[2].path(),
        ws.config
            .image_dir
            .join("NGC7000/ASI1600/ED80-T/L/2024-03/000003_ngc7000.fits")
    );

    let reverted = mover.revert(&mut Silent).unwrap();
    assert_eq!(reverted.reverted.len(), 3);
    assert!(reverted.failures.is_empty());
    for (path, hash) in originals.iter().zip(&hashes) {
        assert_eq!(&hash_file(path).unwrap(), hash);
    }
    assert_eq!(ws.library.image_count().unwrap(), 0);

    // Reverted files are new again to the catalog
    let again = Discovery::new(&ws.config).run(&ws.library, q, &mut Silent).unwrap();
    assert_eq!(again.records.len(), 3);
}

#[test]
fn test_restore_replaces_corrupted_file() {
    let ws = workspace();
    let lib_dir = ws.config.image_dir.join("M31/ASI1600/ED80-T/L/2024-03");
    let path_a = write_fits(&lib_dir, "000042_m31.fits", "M31", "the original frame");
    let hash = hash_file(&path_a).unwrap();
    let backup_dir = ws.config.restore_dir.join("backup");
    fs::create_dir_all(&backup_dir).unwrap();
    let path_b = backup_dir.join("m31.fits");
    fs::copy(&path_a, &path_b).unwrap();

    let mut record = Discovery::new(&ws.config)
        .run(&ws.library, &lib_dir, &mut Silent)
        .unwrap()
        .records
        .remove(0);
    record.id = 42;
    let table = ws.library.tables().library.clone();
    ws.library
        .write_table(&table, &[record], WriteMode::Append)
        .unwrap();

    // The library copy rots; the backup is still good
    fs::write(&path_a, b"corrupted").unwrap();
    assert_eq!(hash_file(&path_b).unwrap(), hash);

    let restorer = Restorer::new(&ws.library, &ws.config);
    let found = restorer.find(&mut Silent).unwrap();
    assert_eq!(found.matches.len(), 1);
    assert_eq!(found.matches[0].old_id, 42);
    assert_eq!(found.matches[0].new_id, 43);
    assert!(found.ambiguous.is_empty());

    let report = restorer.restore(&found.matches, &mut Silent).unwrap();
    assert_eq!(report.restored, vec![42]);
    assert!(path_a.exists());
    assert_eq!(hash_file(&path_a).unwrap(), hash);
    assert!(!path_b.exists());
}
