use super::PipelineState;
use crate::error::PipelineError;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Write `bytes` to `path` atomically.
///
/// The data goes to `<path>.tmp`, is fsynced, then renamed over `path`, so a
/// reader sees either the old document or the new one.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = sibling_path(path, "tmp");

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    fsync_parent(path)
}

pub(crate) fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".");
    os.push(suffix);
    PathBuf::from(os)
}

#[cfg(target_family = "unix")]
fn fsync_parent(path: &Path) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    File::open(parent)?.sync_all()
}

#[cfg(not(target_family = "unix"))]
fn fsync_parent(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// File-backed home of the [`PipelineState`] document
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    backup_previous: bool,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>, backup_previous: bool) -> Self {
        Self {
            path: path.into(),
            backup_previous,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        sibling_path(&self.path, "bak")
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the document; `Ok(None)` when it has never been written
    pub fn load(&self) -> Result<Option<PipelineState>, PipelineError> {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No previous statistics document");
                return Ok(None);
            }
            Err(source) => {
                return Err(PipelineError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let state: PipelineState =
            serde_json::from_str(&json).map_err(|source| PipelineError::Json {
                path: self.path.clone(),
                source,
            })?;

        let stale = state.inconsistent_buckets();
        if !stale.is_empty() {
            warn!(
                buckets = stale.len(),
                first = %stale[0],
                "Stored aggregates disagree with their sales; they will be rebuilt when touched"
            );
        }

        info!(
            path = %self.path.display(),
            attributes = state.attributes.len(),
            sales = state.total_sales_records,
            watermark = ?state.last_processed_date,
            "📂 Statistics document loaded"
        );
        Ok(Some(state))
    }

    /// Replace the document atomically, keeping the previous one as `.bak`
    /// when configured.
    pub fn save(&self, state: &PipelineState) -> Result<(), PipelineError> {
        let json = serde_json::to_string_pretty(state).map_err(|source| PipelineError::Json {
            path: self.path.clone(),
            source,
        })?;

        if self.backup_previous && self.path.exists() {
            let backup = self.backup_path();
            fs::copy(&self.path, &backup).map_err(|source| PipelineError::Write {
                path: backup.clone(),
                source,
            })?;
        }

        write_atomic(&self.path, json.as_bytes()).map_err(|source| PipelineError::Write {
            path: self.path.clone(),
            source,
        })?;

        info!(
            path = %self.path.display(),
            attributes = state.total_attributes,
            sales = state.total_sales_records,
            "💾 Statistics document saved"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::sale;
    use chrono::{TimeZone, Utc};

    fn temp_data_dir(test_name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "traitstats_store_{}_{}",
            test_name,
            uuid::Uuid::new_v4()
        ))
    }

    fn sample_state() -> PipelineState {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let mut state = PipelineState::new(30.0, now);
        state.append_sale("Background", "Forest", sale(1, 1.5, "2024-05-31", Some("T1")));
        state.recompute_all();
        state.advance_watermark(now);
        state.finalize(now, 30.0);
        state
    }

    #[test]
    fn missing_document_loads_as_none() {
        let dir = temp_data_dir("missing");
        let store = StateStore::new(dir.join("stats.json"), false);
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn save_then_load_returns_same_document() {
        let dir = temp_data_dir("roundtrip");
        let store = StateStore::new(dir.join("stats.json"), false);
        let state = sample_state();
        store.save(&state).unwrap();

        assert!(!sibling_path(store.path(), "tmp").exists());
        assert_eq!(store.load().unwrap().unwrap(), state);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn save_keeps_previous_document_as_backup() {
        let dir = temp_data_dir("backup");
        let store = StateStore::new(dir.join("stats.json"), true);
        let first = sample_state();
        store.save(&first).unwrap();

        let mut second = first.clone();
        second.append_sale("Hat", "Cap", sale(2, 2.0, "2024-06-01", Some("T2")));
        second.recompute_all();
        second.finalize(Utc::now(), 30.0);
        store.save(&second).unwrap();

        let backup: PipelineState =
            serde_json::from_str(&fs::read_to_string(store.backup_path()).unwrap()).unwrap();
        assert_eq!(backup, first);
        assert_eq!(store.load().unwrap().unwrap().total_attributes, 2);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn corrupt_document_is_a_hard_error() {
        let dir = temp_data_dir("corrupt");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("stats.json");
        fs::write(&path, "{ not json").unwrap();

        let err = StateStore::new(&path, false).load().unwrap_err();
        assert!(matches!(err, PipelineError::Json { .. }));
        fs::remove_dir_all(&dir).ok();
    }
}
