//! Seed and backup protocols against the flat backup file.
//!
//! Row format: `id,name,region,district,population,foundation`, no quoting.
//! Backups are written to a temporary file next to the target and renamed
//! over it, so concurrent writers never leave a truncated or mixed file.

use std::fs::Permissions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::error::{BackupError, SeedError};
use super::sqlite::CityStore;
use crate::cities::CityRecord;

const FIELD_COUNT: usize = 6;

/// Outcome of a successful seed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedReport {
    /// Rows inserted into the store
    pub inserted: usize,
}

/// Parse one backup row into a record
pub fn parse_row(line: &str) -> Result<CityRecord, String> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != FIELD_COUNT {
        return Err(format!(
            "expected {} fields, found {}",
            FIELD_COUNT,
            fields.len()
        ));
    }

    let number = |name: &str, raw: &str| {
        raw.parse::<i64>()
            .map_err(|e| format!("invalid {} {:?}: {}", name, raw, e))
    };

    Ok(CityRecord {
        id: number("id", fields[0])?,
        name: fields[1].to_string(),
        region: fields[2].to_string(),
        district: fields[3].to_string(),
        population: number("population", fields[4])?,
        foundation: number("foundation", fields[5])?,
    })
}

/// Insert every row of the backup file into the store.
///
/// Stops at the first malformed row or failed insert. Rows inserted before
/// that point are kept.
pub async fn seed_from_file(store: &CityStore, path: &Path) -> Result<SeedReport, SeedError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| SeedError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    let mut inserted = 0;
    for (idx, raw) in content.lines().enumerate() {
        let line = idx + 1;
        let raw = raw.trim_end_matches('\r');
        if raw.is_empty() {
            continue;
        }

        let city = parse_row(raw).map_err(|reason| SeedError::Malformed {
            line,
            reason,
            inserted,
        })?;

        store
            .insert(city)
            .await
            .map_err(|source| SeedError::Insert {
                line,
                inserted,
                source,
            })?;
        inserted += 1;
    }

    Ok(SeedReport { inserted })
}

/// Render a snapshot as backup file content.
///
/// Records whose text fields would break the unescaped format are skipped.
pub fn render_backup(records: &[CityRecord]) -> String {
    let mut out = String::new();
    for city in records {
        if !city.is_backup_safe() {
            warn!(
                "Skipping city {} in backup: text field contains a delimiter",
                city.id
            );
            continue;
        }
        out.push_str(&city.to_backup_row());
        out.push('\n');
    }
    out
}

/// Dump the whole table to `path`, replacing it atomically.
///
/// Returns the number of rows written.
pub async fn write_backup(store: &CityStore, path: &Path) -> Result<usize, BackupError> {
    let records = store.all().await?;
    let content = render_backup(&records);
    let rows = content.lines().count();

    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || replace_file(&target, content.as_bytes()))
        .await??;

    info!("Backed up {} cities to {:?}", rows, path);
    Ok(rows)
}

fn replace_file(target: &Path, content: &[u8]) -> Result<(), BackupError> {
    let write_err = |source: std::io::Error| BackupError::Write {
        path: target.to_path_buf(),
        source,
    };

    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut tmp = NamedTempFile::new_in(&dir).map_err(write_err)?;
    // Temp files are owner-only; keep the mode of the file being replaced
    let permissions = match std::fs::metadata(target) {
        Ok(meta) => Some(meta.permissions()),
        Err(_) => new_file_permissions(),
    };
    if let Some(permissions) = permissions {
        tmp.as_file()
            .set_permissions(permissions)
            .map_err(write_err)?;
    }
    tmp.write_all(content).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    debug!("Renaming {:?} over {:?}", tmp.path(), target);
    tmp.persist(target).map_err(|e| write_err(e.error))?;

    Ok(())
}

#[cfg(unix)]
fn new_file_permissions() -> Option<Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn new_file_permissions() -> Option<Permissions> {
    None
}
