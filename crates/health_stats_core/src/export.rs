//! CSV serialization of daily records and export artifact management.

use crate::config::ExportConfig;
use crate::observability;
use crate::{DailyRecord, ExportArtifact, ExportError};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

pub const FILE_PREFIX: &str = "HealthStats_";
pub const FILE_EXTENSION: &str = "csv";
pub const CSV_HEADER: &str =
    "Date,Steps,Active Energy (kcal),Carbs (g),Proteins (g),Fats (g),Calories (kcal)";

const CSV_COLUMNS: [&str; 7] = [
    "Date",
    "Steps",
    "Active Energy (kcal)",
    "Carbs (g)",
    "Proteins (g)",
    "Fats (g)",
    "Calories (kcal)",
];

/// Render `records` as CSV text: one header line, one row per record, rows
/// joined by `\n` with no trailing newline.
///
/// Steps, active energy and calories are truncated toward zero; the
/// macronutrient columns keep one decimal place.
pub fn render_csv(records: &[DailyRecord]) -> Result<String, ExportError> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(CSV_COLUMNS)?;
    for r in records {
        writer.write_record([
            r.date.format("%Y-%m-%d").to_string(),
            truncate(r.steps).to_string(),
            truncate(r.active_energy).to_string(),
            format!("{:.1}", r.carbs),
            format!("{:.1}", r.proteins),
            format!("{:.1}", r.fats),
            truncate(r.calories).to_string(),
        ])?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    let mut out = String::from_utf8(bytes).map_err(|e| {
        csv::Error::from(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })?;
    if out.ends_with('\n') {
        out.pop();
    }
    Ok(out)
}

fn truncate(v: f64) -> i64 {
    v.trunc() as i64
}

/// `HealthStats_<unix millis>_<8 hex>.csv`
fn artifact_name(now: SystemTime) -> String {
    let millis = now
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{FILE_PREFIX}{millis}_{}.{FILE_EXTENSION}", &suffix[..8])
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

fn is_artifact(path: &Path) -> bool {
    let ext_ok = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e == FILE_EXTENSION);
    ext_ok && file_name(path).is_some_and(|n| n.starts_with(FILE_PREFIX))
}

/// Leftover of an interrupted write: `.HealthStats_*.csv.tmp`.
fn is_temp_artifact(path: &Path) -> bool {
    file_name(path).is_some_and(|n| {
        n.strip_prefix('.')
            .is_some_and(|rest| rest.starts_with(FILE_PREFIX))
            && n.ends_with(&format!(".{FILE_EXTENSION}.tmp"))
    })
}

#[cfg(target_os = "macos")]
const BACKUP_EXCLUDE_XATTR: &str = "com.apple.metadata:com_apple_backup_excludeItem";

/// Binary plist holding the string `com.apple.backupd`, as written by `tmutil addexclusion`.
#[cfg(target_os = "macos")]
const BACKUP_EXCLUDE_VALUE: &[u8] = b"bplist00_\x10\x11com.apple.backupd\x08\
\x00\x00\x00\x00\x00\x00\x01\x01\
\x00\x00\x00\x00\x00\x00\x00\x01\
\x00\x00\x00\x00\x00\x00\x00\x00\
\x00\x00\x00\x00\x00\x00\x00\x1c";

/// Mark `path` as excluded from backups. Returns whether the mark was applied.
#[cfg(target_os = "macos")]
fn exclude_from_backup(path: &Path, requested: bool) -> bool {
    if !requested {
        return false;
    }
    match xattr::set(path, BACKUP_EXCLUDE_XATTR, BACKUP_EXCLUDE_VALUE) {
        Ok(()) => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to exclude csv export from backup");
            false
        }
    }
}

/// No backup-exclusion attribute on this platform.
#[cfg(not(target_os = "macos"))]
fn exclude_from_backup(path: &Path, requested: bool) -> bool {
    if requested {
        debug!(path = %path.display(), "backup exclusion not supported on this platform");
    }
    false
}

#[derive(Clone, Debug)]
pub struct CsvExporter {
    config: ExportConfig,
}

impl CsvExporter {
    pub fn new(config: ExportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Write `records` to a new artifact.
    ///
    /// Returns `Ok(None)` without touching the filesystem when `records` is empty.
    pub async fn export_csv(
        &self,
        records: &[DailyRecord],
    ) -> Result<Option<ExportArtifact>, ExportError> {
        self.export_csv_at(records, SystemTime::now()).await
    }

    /// [`export_csv`](Self::export_csv) with an explicit clock reading, used
    /// both for the file name and for the staleness cutoff.
    pub async fn export_csv_at(
        &self,
        records: &[DailyRecord],
        now: SystemTime,
    ) -> Result<Option<ExportArtifact>, ExportError> {
        if records.is_empty() {
            debug!("no records to export");
            observability::record_export("empty");
            return Ok(None);
        }

        let dir = &self.config.export_dir;
        tokio::fs::create_dir_all(dir).await.map_err(|source| {
            observability::record_export("error");
            ExportError::Io {
                path: dir.clone(),
                source,
            }
        })?;

        self.cleanup_stale(now).await;

        let content = render_csv(records).inspect_err(|_| observability::record_export("error"))?;
        let path = dir.join(artifact_name(now));
        if let Err(source) = write_new(&path, &content).await {
            observability::record_export("error");
            warn!(path = %path.display(), error = %source, "csv export failed");
            return Err(ExportError::Io { path, source });
        }

        let excluded_from_backup = exclude_from_backup(&path, self.config.exclude_from_backup);
        observability::record_export("written");
        info!(path = %path.display(), rows = records.len(), "exported csv");

        Ok(Some(ExportArtifact {
            path,
            content,
            created_at: DateTime::<Utc>::from(now),
            excluded_from_backup,
        }))
    }

    /// Remove artifacts, and temp files of interrupted writes, created more
    /// than the retention window before `now`.
    ///
    /// Failures are logged and skipped. Returns the number of removed files.
    pub async fn cleanup_stale(&self, now: SystemTime) -> usize {
        let dir = &self.config.export_dir;
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "failed to list old csv exports");
                return 0;
            }
        };

        let mut removed = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "failed to list old csv exports");
                    break;
                }
            };
            let path = entry.path();
            if !is_artifact(&path) && !is_temp_artifact(&path) {
                continue;
            }
            match self.is_stale(&path, now).await {
                Ok(true) => match tokio::fs::remove_file(&path).await {
                    Ok(()) => {
                        debug!(path = %path.display(), "removed stale csv export");
                        removed += 1;
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "failed to remove csv export"),
                },
                Ok(false) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to stat csv export"),
            }
        }

        observability::record_stale_removed(removed);
        removed
    }

    async fn is_stale(&self, path: &Path, now: SystemTime) -> std::io::Result<bool> {
        let meta = tokio::fs::metadata(path).await?;
        let created = meta.created().or_else(|_| meta.modified())?;
        let age = now.duration_since(created).unwrap_or(Duration::ZERO);
        Ok(age > self.config.retention)
    }
}

/// Write to a hidden temporary sibling, then link it into place.
///
/// Fails with `AlreadyExists` instead of replacing an existing `path`.
async fn write_new(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp = tmp_path(path);
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&tmp)
        .await?;
    let written = async {
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await
    }
    .await;
    drop(file);
    let placed = match written {
        Ok(()) => place(&tmp, path).await,
        Err(e) => Err(e),
    };
    let _ = tokio::fs::remove_file(&tmp).await;
    placed
}

/// Hard link `tmp` to `path`; where links are unsupported, rename only if
/// nothing is at `path` yet.
async fn place(tmp: &Path, path: &Path) -> std::io::Result<()> {
    match tokio::fs::hard_link(tmp, path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(e),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "hard link failed, renaming");
            if tokio::fs::try_exists(path).await? {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    format!("{} already exists", path.display()),
                ));
            }
            tokio::fs::rename(tmp, path).await
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record(date: &str, steps: f64, energy: f64, carbs: f64, calories: f64) -> DailyRecord {
        DailyRecord {
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            steps,
            active_energy: energy,
            carbs,
            proteins: 20.0,
            fats: 10.0,
            calories,
        }
    }

    #[test]
    fn render_single_record_exact() {
        let csv = render_csv(&[record("1970-01-01", 1000.0, 200.0, 50.0, 500.0)]).unwrap();
        assert_eq!(
            csv,
            "Date,Steps,Active Energy (kcal),Carbs (g),Proteins (g),Fats (g),Calories (kcal)\n\
             1970-01-01,1000,200,50.0,20.0,10.0,500"
        );
    }

    #[test]
    fn integer_columns_truncate() {
        let csv = render_csv(&[record("2025-01-01", 999.9, 10.99, 1.25, 1999.999)]).unwrap();
        let row = csv.lines().nth(1).unwrap();
        assert!(row.starts_with("2025-01-01,999,10,"));
        assert!(row.ends_with(",1999"));
    }

    #[test]
    fn rows_follow_input_order_without_trailing_newline() {
        let csv = render_csv(&[
            record("2025-01-02", 1.0, 0.0, 0.0, 0.0),
            record("2025-01-01", 2.0, 0.0, 0.0, 0.0),
        ])
        .unwrap();
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("2025-01-02"));
        assert!(lines[2].starts_with("2025-01-01"));
        assert!(!csv.ends_with('\n'));
    }

    #[test]
    fn artifact_names_are_unique_and_recognized() {
        let now = SystemTime::now();
        let a = artifact_name(now);
        let b = artifact_name(now);
        assert_ne!(a, b);
        assert!(is_artifact(Path::new(&a)));
        assert!(!is_artifact(Path::new("HealthStats_1.txt")));
        assert!(!is_artifact(Path::new("other_1.csv")));
        assert!(!is_artifact(&tmp_path(Path::new(&a))));
        assert!(is_temp_artifact(&tmp_path(Path::new(&a))));
        assert!(!is_temp_artifact(Path::new(&a)));
        assert!(!is_temp_artifact(Path::new(".other_1.csv.tmp")));
    }

    #[test]
    fn header_matches_columns() {
        assert_eq!(CSV_COLUMNS.join(","), CSV_HEADER);
        assert_eq!(render_csv(&[]).unwrap(), CSV_HEADER);
    }

    #[tokio::test]
    async fn write_new_never_replaces_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("HealthStats_1_deadbeef.csv");
        std::fs::write(&path, "first").unwrap();

        let err = write_new(&path, "second").await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first");
        assert!(!tmp_path(&path).exists());
    }

    #[tokio::test]
    async fn stale_temp_files_are_pruned() {
        let tmp = tempfile::tempdir().unwrap();
        let leftover = tmp.path().join(".HealthStats_1_deadbeef.csv.tmp");
        std::fs::write(&leftover, "partial").unwrap();
        let exporter = CsvExporter::new(ExportConfig::new(tmp.path()));

        assert_eq!(exporter.cleanup_stale(SystemTime::now()).await, 0);
        assert!(leftover.exists());
        let later = SystemTime::now() + Duration::from_secs(2 * 3600);
        assert_eq!(exporter.cleanup_stale(later).await, 1);
        assert!(!leftover.exists());
    }

    #[cfg(target_os = "macos")]
    #[tokio::test]
    async fn backup_exclusion_sets_xattr() {
        let tmp = tempfile::tempdir().unwrap();
        let exporter = CsvExporter::new(ExportConfig::new(tmp.path()));
        let artifact = exporter
            .export_csv(&[record("2025-01-01", 1.0, 0.0, 0.0, 0.0)])
            .await
            .unwrap()
            .unwrap();
        assert!(artifact.excluded_from_backup);
        let value = xattr::get(&artifact.path, BACKUP_EXCLUDE_XATTR).unwrap();
        assert_eq!(value.as_deref(), Some(BACKUP_EXCLUDE_VALUE));
    }

    #[cfg(not(target_os = "macos"))]
    #[tokio::test]
    async fn backup_exclusion_is_reported_unapplied() {
        let tmp = tempfile::tempdir().unwrap();
        let exporter = CsvExporter::new(ExportConfig::new(tmp.path()));
        let artifact = exporter
            .export_csv(&[record("2025-01-01", 1.0, 0.0, 0.0, 0.0)])
            .await
            .unwrap()
            .unwrap();
        assert!(!artifact.excluded_from_backup);
    }

    #[tokio::test]
    async fn backup_exclusion_not_requested() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = ExportConfig::new(tmp.path());
        config.exclude_from_backup = false;
        let artifact = CsvExporter::new(config)
            .export_csv(&[record("2025-01-01", 1.0, 0.0, 0.0, 0.0)])
            .await
            .unwrap()
            .unwrap();
        assert!(!artifact.excluded_from_backup);
    }
}
