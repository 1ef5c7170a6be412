#[path = "../src/backup.rs"]
mod backup;

use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn read_entry(bundle: &std::path::Path, name: &str) -> Vec<u8> {
    let f = File::open(bundle).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut out = Vec::new();
    archive
        .by_name(name)
        .expect("bundle entry")
        .read_to_end(&mut out)
        .expect("read bundle entry");
    out
}

#[test]
fn zip_export_and_import_roundtrip() {
    let workspace = temp_dir("scrubbuddy-backup-src");
    let workspace2 = temp_dir("scrubbuddy-backup-dst");
    let out_dir = temp_dir("scrubbuddy-backup-out");

    let bytes = b"sqlite-test-payload";
    std::fs::write(workspace.join("scrubbuddy.sqlite3"), bytes).expect("write source db");

    let bundle_path = out_dir.join("workspace.sbbackup.zip");
    let export = backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT_V1);
    assert_eq!(export.entry_count, 3);
    assert_eq!(export.db_sha256.len(), 64);

    let manifest: serde_json::Value =
        serde_json::from_slice(&read_entry(&bundle_path, "manifest.json")).expect("manifest json");
    assert_eq!(manifest["format"], backup::BUNDLE_FORMAT_V1);
    assert_eq!(manifest["dbSha256"], export.db_sha256.as_str());
    assert_eq!(read_entry(&bundle_path, "db/scrubbuddy.sqlite3"), bytes);

    let import = backup::import_workspace_bundle(&bundle_path, &workspace2).expect("import bundle");
    assert_eq!(import.bundle_format_detected, backup::BUNDLE_FORMAT_V1);

    let restored = std::fs::read(workspace2.join("scrubbuddy.sqlite3")).expect("read restored db");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn tampered_bundle_is_rejected_and_destination_kept() {
    let workspace = temp_dir("scrubbuddy-backup-tamper-src");
    let dest = temp_dir("scrubbuddy-backup-tamper-dst");
    let out_dir = temp_dir("scrubbuddy-backup-tamper-out");

    std::fs::write(workspace.join("scrubbuddy.sqlite3"), b"original-db").expect("write db");
    let bundle_path = out_dir.join("good.zip");
    backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");

    // Same manifest, different database bytes.
    let manifest = read_entry(&bundle_path, "manifest.json");
    let tampered = out_dir.join("tampered.zip");
    {
        let f = File::create(&tampered).expect("create tampered zip");
        let mut zip = zip::ZipWriter::new(f);
        let opts = zip::write::FileOptions::default();
        zip.start_file("manifest.json", opts).expect("manifest entry");
        zip.write_all(&manifest).expect("write manifest");
        zip.start_file("db/scrubbuddy.sqlite3", opts).expect("db entry");
        zip.write_all(b"swapped-db").expect("write db");
        zip.finish().expect("finish zip");
    }

    let existing = b"destination-db";
    std::fs::write(dest.join("scrubbuddy.sqlite3"), existing).expect("write destination db");

    let err = backup::import_workspace_bundle(&tampered, &dest).expect_err("tampered import");
    assert!(err.to_string().contains("checksum mismatch"), "{err}");
    let kept = std::fs::read(dest.join("scrubbuddy.sqlite3")).expect("read destination db");
    assert_eq!(kept, existing);

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(dest);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn raw_sqlite_import_is_supported() {
    let out_dir = temp_dir("scrubbuddy-backup-raw");
    let workspace = temp_dir("scrubbuddy-backup-raw-dst");

    let raw_file = out_dir.join("copy.sqlite3");
    let bytes = b"raw-sqlite-copy";
    std::fs::write(&raw_file, bytes).expect("write raw sqlite file");

    let import = backup::import_workspace_bundle(&raw_file, &workspace).expect("import raw sqlite");
    assert_eq!(import.bundle_format_detected, backup::RAW_SQLITE_FORMAT);

    let restored = std::fs::read(workspace.join("scrubbuddy.sqlite3")).expect("read restored sqlite");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn export_without_a_database_fails() {
    let workspace = temp_dir("scrubbuddy-backup-empty");
    let out = workspace.join("out.zip");
    let err = backup::export_workspace_bundle(&workspace, &out).expect_err("export should fail");
    assert!(err.to_string().contains("workspace database not found"));
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn foreign_bundle_format_is_rejected() {
    let out_dir = temp_dir("scrubbuddy-backup-foreign");
    let dest = temp_dir("scrubbuddy-backup-foreign-dst");

    let bundle = out_dir.join("other.zip");
    {
        let f = File::create(&bundle).expect("create zip");
        let mut zip = zip::ZipWriter::new(f);
        let opts = zip::write::FileOptions::default();
        zip.start_file("manifest.json", opts).expect("manifest entry");
        zip.write_all(br#"{"format":"someone-else-v9"}"#)
            .expect("write manifest");
        zip.finish().expect("finish zip");
    }

    let err = backup::import_workspace_bundle(&bundle, &dest).expect_err("foreign import");
    assert!(err.to_string().contains("unsupported bundle format"), "{err}");
    assert!(!dest.join("scrubbuddy.sqlite3").exists());

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(dest);
}
