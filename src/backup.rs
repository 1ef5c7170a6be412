use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_FILE: &str = "scrubbuddy.sqlite3";
const DB_ENTRY: &str = "db/scrubbuddy.sqlite3";
const META_ENTRY: &str = "meta/workspace.json";
const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];
pub const BUNDLE_FORMAT_V1: &str = "scrubbuddy-workspace-v1";
pub const RAW_SQLITE_FORMAT: &str = "raw-sqlite3";

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("workspace database not found: {}", .0.display())]
    MissingDatabase(PathBuf),
    #[error("{action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid bundle: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("manifest.json is invalid: {0}")]
    Manifest(#[from] serde_json::Error),
    #[error("unsupported bundle format: {0}")]
    Format(String),
    #[error("database checksum mismatch: manifest {expected}, bundle {actual}")]
    Checksum { expected: String, actual: String },
}

fn io_err<'a>(action: &'static str, path: &'a Path) -> impl FnOnce(std::io::Error) -> BackupError + 'a {
    move |source| BackupError::Io {
        action,
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    format: String,
    #[serde(default)]
    version: u32,
    #[serde(default)]
    app_version: String,
    #[serde(default)]
    exported_at: String,
    #[serde(default)]
    db_sha256: String,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub db_sha256: String,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Zips the workspace database with a manifest carrying its digest.
pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> Result<ExportSummary, BackupError> {
    let db_path = workspace_path.join(DB_FILE);
    if !db_path.is_file() {
        return Err(BackupError::MissingDatabase(db_path));
    }
    let db_bytes = std::fs::read(&db_path).map_err(io_err("failed to read", &db_path))?;
    let manifest = Manifest {
        format: BUNDLE_FORMAT_V1.to_string(),
        version: 1,
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        exported_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        db_sha256: sha256_hex(&db_bytes),
    };
    let meta = serde_json::json!({ "sourceWorkspace": workspace_path.to_string_lossy() });

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err("failed to create", parent))?;
    }
    let out_file = File::create(out_path).map_err(io_err("failed to create", out_path))?;
    let mut zip = ZipWriter::new(out_file);
    let entries: [(&str, Vec<u8>); 3] = [
        (MANIFEST_ENTRY, serde_json::to_vec_pretty(&manifest)?),
        (DB_ENTRY, db_bytes),
        (META_ENTRY, serde_json::to_vec_pretty(&meta)?),
    ];
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, bytes) in &entries {
        zip.start_file(*name, opts)?;
        zip.write_all(bytes).map_err(io_err("failed to write", out_path))?;
    }
    zip.finish()?;

    Ok(ExportSummary {
        bundle_format: manifest.format,
        entry_count: entries.len(),
        db_sha256: manifest.db_sha256,
    })
}

fn read_entry<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Vec<u8>, BackupError> {
    let mut entry = archive.by_name(name)?;
    let mut out = Vec::new();
    entry
        .read_to_end(&mut out)
        .map_err(io_err("failed to extract", Path::new(name)))?;
    Ok(out)
}

fn is_zip_file(path: &Path) -> Result<bool, BackupError> {
    let mut sig = [0u8; 4];
    let mut f = File::open(path).map_err(io_err("failed to open", path))?;
    let read = f.read(&mut sig).map_err(io_err("failed to read", path))?;
    Ok(read == sig.len() && sig == ZIP_MAGIC)
}

/// Restores a workspace database from a bundle or a bare SQLite file.
/// Nothing at the destination changes unless the bundle verifies.
pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> Result<ImportSummary, BackupError> {
    std::fs::create_dir_all(workspace_path).map_err(io_err("failed to create", workspace_path))?;
    let dst = workspace_path.join(DB_FILE);

    if !is_zip_file(in_path)? {
        std::fs::copy(in_path, &dst).map_err(io_err("failed to copy into", &dst))?;
        return Ok(ImportSummary {
            bundle_format_detected: RAW_SQLITE_FORMAT.to_string(),
        });
    }

    let in_file = File::open(in_path).map_err(io_err("failed to open", in_path))?;
    let mut archive = ZipArchive::new(in_file)?;
    let manifest: Manifest = serde_json::from_slice(&read_entry(&mut archive, MANIFEST_ENTRY)?)?;
    if manifest.format != BUNDLE_FORMAT_V1 {
        return Err(BackupError::Format(manifest.format));
    }
    let db_bytes = read_entry(&mut archive, DB_ENTRY)?;
    let actual = sha256_hex(&db_bytes);
    let expected = manifest.db_sha256.to_ascii_lowercase();
    if actual != expected {
        return Err(BackupError::Checksum { expected, actual });
    }

    let staged = workspace_path.join(format!("{DB_FILE}.importing"));
    std::fs::write(&staged, &db_bytes).map_err(io_err("failed to write", &staged))?;
    if dst.exists() {
        std::fs::remove_file(&dst).map_err(io_err("failed to remove", &dst))?;
    }
    std::fs::rename(&staged, &dst).map_err(io_err("failed to replace", &dst))?;

    Ok(ImportSummary {
        bundle_format_detected: manifest.format,
    })
}
