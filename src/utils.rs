use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use rusqlite::{Connection, OpenFlags, backup::Backup};
use serde::Deserialize;
use tempfile::NamedTempFile;

use crate::error::ExportError;

/// How much the run reports on stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

impl Verbosity {
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        match (verbose, quiet) {
            (_, true) => Verbosity::Quiet,
            (true, false) => Verbosity::Verbose,
            (false, false) => Verbosity::Normal,
        }
    }
}

/// Configuration required to run the export process.
/// This decouples the logic from how the arguments were parsed (CLI/Config file).
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Output directory.
    pub dest: PathBuf,
    /// Signal profile directory holding `config.json`, `sql/` and attachments.
    pub source: PathBuf,
    /// Previous export to merge into the new one.
    pub old: Option<PathBuf>,
    pub chats: Option<Vec<String>>,
    pub conversation: Option<String>,
    pub year: Option<i32>,
    pub attachments_only: bool,
    pub classifier_cmd: Option<String>,
    pub page_size: usize,
    pub overwrite: bool,
    pub list_chats: bool,
    pub verbosity: Verbosity,
}

impl ExportConfig {
    pub fn new(dest: impl Into<PathBuf>, source: impl Into<PathBuf>) -> Self {
        Self {
            dest: dest.into(),
            source: source.into(),
            old: None,
            chats: None,
            conversation: None,
            year: None,
            attachments_only: false,
            classifier_cmd: None,
            page_size: DEFAULT_PAGE_SIZE,
            overwrite: false,
            list_chats: false,
            verbosity: Verbosity::Normal,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.source.join("sql").join("db.sqlite")
    }

    pub fn key_path(&self) -> PathBuf {
        self.source.join("config.json")
    }

    pub fn attachments_root(&self) -> PathBuf {
        self.source.join("attachments.noindex")
    }
}

pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Read the hex SQLCipher key from the profile's `config.json`.
pub fn read_key(path: &Path) -> std::result::Result<String, ExportError> {
    #[derive(Deserialize)]
    struct KeyFile {
        key: Option<String>,
    }

    let missing = || ExportError::MissingKey {
        path: path.to_path_buf(),
    };
    let content = fs::read_to_string(path).map_err(|_| missing())?;
    let parsed: KeyFile = serde_json::from_str(&content)?;
    parsed.key.filter(|k| !k.is_empty()).ok_or_else(missing)
}

/// Copy the store into a temporary file through the SQLite backup API so the
/// live database is never touched. The copy is deleted when the handle drops.
pub fn snapshot_database(db_path: &Path, key: Option<&str>) -> Result<NamedTempFile> {
    let src = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .wrap_err_with(|| format!("Failed to open source database: {}", db_path.display()))?;
    if let Some(key) = key {
        apply_key(&src, key).wrap_err("Failed to unlock source database")?;
    }

    let tmp = NamedTempFile::new().wrap_err("Failed to create temporary file")?;
    let mut dst =
        Connection::open(tmp.path()).wrap_err("Failed to open snapshot database connection")?;
    if let Some(key) = key {
        apply_key(&dst, key).wrap_err("Failed to key snapshot database")?;
    }

    {
        let backup = Backup::new(&src, &mut dst).wrap_err("Failed to initialize backup")?;
        backup
            .run_to_completion(1000, Duration::from_millis(5), None)
            .wrap_err("Backup did not complete successfully")?;
    }

    drop(src);
    Ok(tmp)
}

/// SQLCipher settings used by Signal Desktop. Plain SQLite ignores them.
pub fn apply_key(conn: &Connection, key: &str) -> rusqlite::Result<()> {
    if !key.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(rusqlite::Error::InvalidParameterName(
            "key must be hexadecimal".into(),
        ));
    }
    // Pragmas cannot take bound parameters.
    conn.execute_batch(&format!(
        "PRAGMA key = \"x'{}'\";
         PRAGMA cipher_page_size = 4096;
         PRAGMA kdf_iter = 64000;
         PRAGMA cipher_hmac_algorithm = HMAC_SHA512;
         PRAGMA cipher_kdf_algorithm = PBKDF2_HMAC_SHA512;",
        key
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_flags() {
        assert_eq!(Verbosity::from_flags(true, true), Verbosity::Quiet);
        assert_eq!(Verbosity::from_flags(true, false), Verbosity::Verbose);
        assert_eq!(Verbosity::from_flags(false, false), Verbosity::Normal);
    }

    #[test]
    fn config_paths() {
        let cfg = ExportConfig::new("out", "/sig");
        assert_eq!(cfg.db_path(), PathBuf::from("/sig/sql/db.sqlite"));
        assert_eq!(cfg.key_path(), PathBuf::from("/sig/config.json"));
        assert_eq!(cfg.attachments_root(), PathBuf::from("/sig/attachments.noindex"));
        assert_eq!(cfg.page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn key_is_read_from_config_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"key": "abcdef01", "other": 1}"#).unwrap();
        assert_eq!(read_key(&path).unwrap(), "abcdef01");
    }

    #[test]
    fn missing_key_file_or_field_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        assert!(matches!(read_key(&path), Err(ExportError::MissingKey { .. })));
        fs::write(&path, "{}").unwrap();
        assert!(matches!(read_key(&path), Err(ExportError::MissingKey { .. })));
    }

    #[test]
    fn non_hex_keys_are_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(apply_key(&conn, "x'; DROP").is_err());
    }

    #[test]
    fn snapshot_copies_plain_database() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("db.sqlite");
        {
            let conn = Connection::open(&db).unwrap();
            conn.execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (7);")
                .unwrap();
        }
        let snap = snapshot_database(&db, None).unwrap();
        let conn = Connection::open(snap.path()).unwrap();
        let x: i64 = conn.query_row("SELECT x FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(x, 7);
        let path = snap.path().to_path_buf();
        drop(conn);
        drop(snap);
        assert!(!path.exists());
    }
}
