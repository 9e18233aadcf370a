use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(test)]
use std::sync::Arc;

use crate::errors::AppResult;
#[cfg(test)]
use crate::errors::AppError;
use crate::providers::Candidate;

pub const MAX_ROW_ERRORS: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    Uploaded,
    #[default]
    Failed,
}

/// One outcome per attempted place. Success fields are absent on failures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerRow {
    #[serde(with = "timestamp")]
    pub at: DateTime<Utc>,
    pub index: usize,
    pub total: usize,
    pub country_code: String,
    pub place_id: String,
    pub place_name_en: String,
    pub key: String,
    pub status: LedgerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_asset_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_token_hits: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optional_token_hits: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribution_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photographer_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RowContext {
    pub index: usize,
    pub total: usize,
    pub country_code: String,
    pub place_id: String,
    pub place_name_en: String,
    pub key: String,
}

impl LedgerRow {
    fn from_context(ctx: &RowContext, status: LedgerStatus) -> Self {
        Self {
            at: Utc::now(),
            index: ctx.index,
            total: ctx.total,
            country_code: ctx.country_code.clone(),
            place_id: ctx.place_id.clone(),
            place_name_en: ctx.place_name_en.clone(),
            key: ctx.key.clone(),
            status,
            ..Self::default()
        }
    }

    pub fn uploaded(
        ctx: &RowContext,
        candidate: &Candidate,
        bytes: u64,
        content_type: &str,
    ) -> Self {
        Self {
            bytes: Some(bytes),
            content_type: Some(content_type.to_string()),
            provider: Some(candidate.provider.to_string()),
            provider_asset_id: Some(candidate.provider_asset_id.clone()),
            provider_query: Some(candidate.query.clone()),
            query_strategy: Some(candidate.query_strategy.clone()),
            match_score: Some(candidate.match_score),
            required_token_hits: Some(candidate.required_token_hits),
            optional_token_hits: Some(candidate.optional_token_hits),
            license_label: Some(candidate.license_label.clone()),
            attribution_url: candidate.attribution_url.clone(),
            photographer_name: candidate.photographer_name.clone(),
            ..Self::from_context(ctx, LedgerStatus::Uploaded)
        }
    }

    pub fn failed(ctx: &RowContext, mut errors: Vec<String>) -> Self {
        errors.truncate(MAX_ROW_ERRORS);
        Self {
            errors,
            ..Self::from_context(ctx, LedgerStatus::Failed)
        }
    }

    pub fn is_uploaded(&self) -> bool {
        self.status == LedgerStatus::Uploaded && !self.key.is_empty()
    }
}

/// Append-only outcome log. Rows are never rewritten once appended.
pub trait LedgerStore: Send + Sync {
    fn append(&self, row: &LedgerRow) -> AppResult<()>;

    /// Every readable row, in append order.
    fn replay(&self) -> AppResult<Vec<LedgerRow>>;
}

/// Keys already durably uploaded according to `rows`.
pub fn uploaded_keys(rows: &[LedgerRow]) -> HashSet<String> {
    rows.iter()
        .filter(|row| row.is_uploaded())
        .map(|row| row.key.clone())
        .collect()
}

/// Newline-delimited JSON ledger; each row is written with a single append.
pub struct JsonlLedger {
    path: PathBuf,
    write_lock: Mutex<()>,
    #[cfg(test)]
    fault_injector: Option<Arc<TestFaultInjector>>,
}

impl JsonlLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            #[cfg(test)]
            fault_injector: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// True for an empty file or one whose last byte terminates a row.
fn ends_with_newline(file: &mut fs::File) -> io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    let mut last = [0_u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

impl LedgerStore for JsonlLedger {
    fn append(&self, row: &LedgerRow) -> AppResult<()> {
        let mut line = serde_json::to_vec(row)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock();
        #[cfg(test)]
        if self
            .fault_injector
            .as_ref()
            .map(|hooks| hooks.take_disk_full())
            .unwrap_or(false)
        {
            return Err(AppError::Io(io::Error::new(
                io::ErrorKind::WriteZero,
                "simulated disk full",
            )));
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;
        if !ends_with_newline(&mut file)? {
            line.insert(0, b'\n');
        }
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }

    fn replay(&self) -> AppResult<Vec<LedgerRow>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut rows = Vec::new();
        for (line_no, raw) in contents.lines().enumerate() {
            if raw.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LedgerRow>(raw) {
                Ok(row) => rows.push(row),
                Err(err) => warn!(
                    line = line_no + 1,
                    error = %err,
                    "skipping unreadable ledger row"
                ),
            }
        }
        Ok(rows)
    }
}

/// In-memory ledger for runs that must not touch the filesystem.
#[derive(Default)]
pub struct MemoryLedger {
    rows: Mutex<Vec<LedgerRow>>,
}

impl MemoryLedger {
    pub fn with_rows(rows: Vec<LedgerRow>) -> Self {
        Self {
            rows: Mutex::new(rows),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }
}

impl LedgerStore for MemoryLedger {
    fn append(&self, row: &LedgerRow) -> AppResult<()> {
        self.rows.lock().push(row.clone());
        Ok(())
    }

    fn replay(&self) -> AppResult<Vec<LedgerRow>> {
        Ok(self.rows.lock().clone())
    }
}

mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[derive(Default)]
pub struct TestFaultInjector {
    disk_full: AtomicBool,
}

#[cfg(test)]
impl TestFaultInjector {
    pub fn fail_next_disk_full(&self) {
        self.disk_full.store(true, Ordering::SeqCst);
    }

    fn take_disk_full(&self) -> bool {
        self.disk_full.swap(false, Ordering::SeqCst)
    }
}

#[cfg(test)]
impl JsonlLedger {
    pub fn enable_test_hooks(&mut self) -> Arc<TestFaultInjector> {
        let hooks = Arc::new(TestFaultInjector::default());
        self.fault_injector = Some(hooks.clone());
        hooks
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::providers::ProviderKind;

    fn context(key: &str) -> RowContext {
        RowContext {
            index: 1,
            total: 2,
            country_code: "KR".into(),
            place_id: "kr-001".into(),
            place_name_en: "Busan City Beach".into(),
            key: key.into(),
        }
    }

    fn candidate() -> Candidate {
        Candidate {
            provider: ProviderKind::Pexels,
            provider_asset_id: "77".into(),
            image_url: "https://images.pexels/77.jpg".into(),
            photographer_name: Some("Kim".into()),
            attribution_url: Some("https://www.pexels.com/photo/77/".into()),
            license_label: "Pexels License".into(),
            match_score: 15.0,
            required_token_hits: 1,
            optional_token_hits: 1,
            query: "Busan Korea beach".into(),
            query_strategy: "city_country_semantic_beach".into(),
        }
    }

    #[test]
    fn appends_rows_and_replays_them_in_order() {
        let dir = tempdir().unwrap();
        let ledger = JsonlLedger::new(dir.path().join("runtime").join("manifest.jsonl"));
        ledger
            .append(&LedgerRow::uploaded(&context("k/1.jpg"), &candidate(), 2048, "image/jpeg"))
            .unwrap();
        ledger
            .append(&LedgerRow::failed(&context("k/2.jpg"), vec!["boom".into()]))
            .unwrap();

        let rows = ledger.replay().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].status, LedgerStatus::Uploaded);
        assert_eq!(rows[0].provider.as_deref(), Some("pexels"));
        assert_eq!(rows[0].bytes, Some(2048));
        assert_eq!(rows[1].errors, vec!["boom".to_string()]);
        assert_eq!(
            uploaded_keys(&rows),
            HashSet::from(["k/1.jpg".to_string()])
        );
    }

    #[test]
    fn failed_rows_omit_success_fields_and_cap_errors() {
        let errors = (0..25).map(|i| format!("err-{i}")).collect();
        let row = LedgerRow::failed(&context("k/3.jpg"), errors);
        assert_eq!(row.errors.len(), MAX_ROW_ERRORS);

        let json: serde_json::Value = serde_json::to_value(&row).unwrap();
        assert_eq!(json["status"], "failed");
        assert!(json.get("provider").is_none());
        assert!(json.get("bytes").is_none());
        assert!(json["at"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn replay_tolerates_garbage_and_partial_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("manifest.jsonl");
        fs::write(
            &path,
            concat!(
                "{\"at\":\"2024-05-01T10:00:00Z\",\"key\":\"a.jpg\",\"status\":\"uploaded\"}\n",
                "\n",
                "not json\n",
                "{\"at\":\"2024-05-01T10:00:01Z\",\"key\":\"b.jpg\",\"status\":\"failed\"}\n",
                "{\"at\":\"2024-05-01T10:00:02Z\",\"key\":\"\",\"status\":\"uploaded\"}\n",
                "{\"at\":\"2024-05-01T10:00:03Z\",\"key\":\"c.jpg\",\"sta",
            ),
        )
        .unwrap();

        let rows = JsonlLedger::new(&path).replay().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(uploaded_keys(&rows), HashSet::from(["a.jpg".to_string()]));
    }

    #[test]
    fn append_after_torn_line_keeps_new_row_readable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("manifest.jsonl");
        fs::write(
            &path,
            concat!(
                "{\"at\":\"2024-05-01T10:00:00Z\",\"key\":\"a.jpg\",\"status\":\"uploaded\"}\n",
                "{\"at\":\"2024-05-01T10:00:01Z\",\"key\":\"c.jp",
            ),
        )
        .unwrap();

        let ledger = JsonlLedger::new(&path);
        ledger
            .append(&LedgerRow::uploaded(&context("b.jpg"), &candidate(), 512, "image/jpeg"))
            .unwrap();

        let rows = ledger.replay().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(
            uploaded_keys(&rows),
            HashSet::from(["a.jpg".to_string(), "b.jpg".to_string()])
        );
        assert!(fs::read_to_string(&path).unwrap().ends_with('\n'));
    }

    #[test]
    fn missing_file_replays_empty() {
        let dir = tempdir().unwrap();
        let ledger = JsonlLedger::new(dir.path().join("absent.jsonl"));
        assert!(ledger.replay().unwrap().is_empty());
    }

    #[test]
    fn failed_append_leaves_existing_rows_intact() {
        let dir = tempdir().unwrap();
        let mut ledger = JsonlLedger::new(dir.path().join("manifest.jsonl"));
        ledger
            .append(&LedgerRow::failed(&context("k/1.jpg"), vec![]))
            .unwrap();
        let hooks = ledger.enable_test_hooks();
        hooks.fail_next_disk_full();

        assert!(ledger
            .append(&LedgerRow::failed(&context("k/2.jpg"), vec![]))
            .is_err());
        let rows = ledger.replay().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key, "k/1.jpg");
    }

    #[test]
    fn memory_ledger_replays_appended_rows() {
        let ledger = MemoryLedger::default();
        assert!(ledger.is_empty());
        ledger
            .append(&LedgerRow::uploaded(&context("k/1.jpg"), &candidate(), 1, "image/png"))
            .unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(uploaded_keys(&ledger.replay().unwrap()).len(), 1);
    }
}
