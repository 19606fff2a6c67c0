//! Core types for the ingestion pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// How a job's records arrive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    FileUpload,
    ExternalFetch,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::FileUpload => "FILE_UPLOAD",
            JobKind::ExternalFetch => "EXTERNAL_FETCH",
        }
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FILE_UPLOAD" => Ok(JobKind::FileUpload),
            "EXTERNAL_FETCH" => Ok(JobKind::ExternalFetch),
            other => Err(format!("unknown job kind '{}'", other)),
        }
    }
}

/// Tabular upload layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadType {
    MarketList,
    DailyValuation,
    Holdings,
    Transaction,
    IndexHistory,
}

impl UploadType {
    pub const ALL: [UploadType; 5] = [
        UploadType::MarketList,
        UploadType::DailyValuation,
        UploadType::Holdings,
        UploadType::Transaction,
        UploadType::IndexHistory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UploadType::MarketList => "MARKET_LIST",
            UploadType::DailyValuation => "DAILY_VALUATION",
            UploadType::Holdings => "HOLDINGS",
            UploadType::Transaction => "TRANSACTION",
            UploadType::IndexHistory => "INDEX_HISTORY",
        }
    }
}

impl FromStr for UploadType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_uppercase();
        UploadType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| format!("unknown upload type '{}'", s))
    }
}

impl fmt::Display for UploadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External catalogs that can be pulled on demand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FetchType {
    FetchProducts,
    FetchFundManagers,
    FetchAmcs,
    FetchSchemes,
}

impl FetchType {
    pub const ALL: [FetchType; 4] = [
        FetchType::FetchProducts,
        FetchType::FetchFundManagers,
        FetchType::FetchAmcs,
        FetchType::FetchSchemes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FetchType::FetchProducts => "FETCH_PRODUCTS",
            FetchType::FetchFundManagers => "FETCH_FUND_MANAGERS",
            FetchType::FetchAmcs => "FETCH_AMCS",
            FetchType::FetchSchemes => "FETCH_SCHEMES",
        }
    }

    /// Path segment appended to `FETCH_BASE_URL` when no explicit endpoint is configured
    pub fn default_path(&self) -> &'static str {
        match self {
            FetchType::FetchProducts => "products",
            FetchType::FetchFundManagers => "fund-managers",
            FetchType::FetchAmcs => "amcs",
            FetchType::FetchSchemes => "schemes",
        }
    }
}

impl FromStr for FetchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_uppercase();
        FetchType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| format!("unknown fetch job type '{}'", s))
    }
}

impl fmt::Display for FetchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type tag of a job; the unit of mutual exclusion in the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobType {
    Upload(UploadType),
    Fetch(FetchType),
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Upload(t) => t.as_str(),
            JobType::Fetch(t) => t.as_str(),
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            JobType::Upload(_) => JobKind::FileUpload,
            JobType::Fetch(_) => JobKind::ExternalFetch,
        }
    }

    pub fn log_type(&self) -> LogType {
        LogType::from(self.kind())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<UploadType>()
            .map(JobType::Upload)
            .or_else(|_| s.parse::<FetchType>().map(JobType::Fetch))
            .map_err(|_| format!("unknown job type '{}'", s))
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job log lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" => Ok(JobStatus::Pending),
            "IN_PROGRESS" => Ok(JobStatus::InProgress),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            _ => Err(format!("unknown job status '{}'", s)),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log category shown to operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogType {
    DataUpload,
    DataFetching,
}

impl LogType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogType::DataUpload => "DATA_UPLOAD",
            LogType::DataFetching => "DATA_FETCHING",
        }
    }
}

impl From<JobKind> for LogType {
    fn from(kind: JobKind) -> Self {
        match kind {
            JobKind::FileUpload => LogType::DataUpload,
            JobKind::ExternalFetch => LogType::DataFetching,
        }
    }
}

impl FromStr for LogType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "DATA_UPLOAD" => Ok(LogType::DataUpload),
            "DATA_FETCHING" => Ok(LogType::DataFetching),
            _ => Err(format!("unknown log type '{}'", s)),
        }
    }
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delimited file formats accepted for uploads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileType {
    Csv,
    Tsv,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Csv => "CSV",
            FileType::Tsv => "TSV",
        }
    }

    pub fn delimiter(&self) -> u8 {
        match self {
            FileType::Csv => b',',
            FileType::Tsv => b'\t',
        }
    }

    /// Whether a file name's extension is compatible with this format
    ///
    /// Names without an extension are accepted; `.txt` is accepted for TSV.
    pub fn matches_file_name(&self, file_name: &str) -> bool {
        let Some((_, ext)) = file_name.rsplit_once('.') else {
            return true;
        };
        let ext = ext.to_lowercase();
        match self {
            FileType::Csv => ext == "csv",
            FileType::Tsv => ext == "tsv" || ext == "tab" || ext == "txt",
        }
    }
}

impl FromStr for FileType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "CSV" => Ok(FileType::Csv),
            "TSV" => Ok(FileType::Tsv),
            _ => Err(format!("unsupported file type '{}'", s)),
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a job's records come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum JobPayload {
    /// A spooled upload on local disk
    File {
        path: PathBuf,
        file_type: FileType,
        origin: String,
        file_name: Option<String>,
    },
    /// A catalog pulled through the adapter registered for the job type
    Fetch,
}

/// Queued unit of work, consumed exactly once by the scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub id: Uuid,
    pub kind: JobKind,
    pub job_type: JobType,
    pub submitted_by: String,
    pub submitted_at: DateTime<Utc>,
    pub payload: JobPayload,
}

/// One entry of a job log's error list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub identifier: String,
    pub reason: String,
}

impl ErrorDetail {
    pub fn new(identifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            reason: reason.into(),
        }
    }
}

/// What happened to a single record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordAction {
    Created,
    Updated,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordOutcome {
    pub identifier: String,
    pub action: RecordAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RecordOutcome {
    pub fn applied(identifier: impl Into<String>, action: RecordAction) -> Self {
        Self {
            identifier: identifier.into(),
            action,
            reason: None,
        }
    }

    pub fn failed(identifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            action: RecordAction::Failed,
            reason: Some(reason.into()),
        }
    }

    /// The error entry this outcome contributes to the job log, if any
    pub fn error_detail(&self) -> Option<ErrorDetail> {
        match self.action {
            RecordAction::Failed => Some(ErrorDetail::new(
                self.identifier.clone(),
                self.reason.clone().unwrap_or_else(|| "record failed".to_string()),
            )),
            _ => None,
        }
    }
}

/// Per-job record counters
///
/// `processed_records` always equals the sum of the four outcome buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCounters {
    pub total_records: i64,
    pub processed_records: i64,
    pub added_records: i64,
    pub updated_records: i64,
    pub skipped_records: i64,
    pub failed_records: i64,
}

impl JobCounters {
    /// Count one record outcome
    pub fn record(&mut self, action: RecordAction) {
        match action {
            RecordAction::Created => self.added_records += 1,
            RecordAction::Updated => self.updated_records += 1,
            RecordAction::Skipped => self.skipped_records += 1,
            RecordAction::Failed => self.failed_records += 1,
        }
        self.processed_records += 1;
    }

    pub fn is_consistent(&self) -> bool {
        self.processed_records
            == self.added_records + self.updated_records + self.skipped_records + self.failed_records
            && self.processed_records <= self.total_records
    }
}

/// List view of a job log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobLogSummary {
    pub id: Uuid,
    pub job_type: JobType,
    pub log_type: LogType,
    pub status: JobStatus,
    pub submitted_by: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub counters: JobCounters,
}

/// Full job log including every error entry, in the order they were recorded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobLog {
    #[serde(flatten)]
    pub summary: JobLogSummary,
    pub error_details: Vec<ErrorDetail>,
}

impl JobLog {
    /// Fresh PENDING log for a just-accepted descriptor
    pub fn pending(descriptor: &JobDescriptor) -> Self {
        Self {
            summary: JobLogSummary {
                id: descriptor.id,
                job_type: descriptor.job_type,
                log_type: descriptor.job_type.log_type(),
                status: JobStatus::Pending,
                submitted_by: descriptor.submitted_by.clone(),
                created_at: descriptor.submitted_at,
                started_at: None,
                completed_at: None,
                counters: JobCounters::default(),
            },
            error_details: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.summary.id
    }

    pub fn status(&self) -> JobStatus {
        self.summary.status
    }

    pub fn counters(&self) -> &JobCounters {
        &self.summary.counters
    }
}

/// Filter for job log listings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobLogFilter {
    pub job_type: Option<JobType>,
    pub log_type: Option<LogType>,
    pub status: Option<JobStatus>,
}

impl JobLogFilter {
    pub fn matches(&self, log: &JobLogSummary) -> bool {
        self.job_type.map_or(true, |t| t == log.job_type)
            && self.log_type.map_or(true, |t| t == log.log_type)
            && self.status.map_or(true, |s| s == log.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_type_parses_both_families() {
        assert_eq!(
            "market_list".parse::<JobType>().unwrap(),
            JobType::Upload(UploadType::MarketList)
        );
        assert_eq!(
            "FETCH_AMCS".parse::<JobType>().unwrap(),
            JobType::Fetch(FetchType::FetchAmcs)
        );
        assert!("FETCH_EVERYTHING".parse::<JobType>().is_err());
    }

    #[test]
    fn test_job_type_serializes_as_plain_tag() {
        let json = serde_json::to_string(&JobType::Upload(UploadType::DailyValuation)).unwrap();
        assert_eq!(json, "\"DAILY_VALUATION\"");

        let parsed: JobType = serde_json::from_str("\"FETCH_SCHEMES\"").unwrap();
        assert_eq!(parsed, JobType::Fetch(FetchType::FetchSchemes));
    }

    #[test]
    fn test_log_type_follows_kind() {
        assert_eq!(
            JobType::Upload(UploadType::Holdings).log_type(),
            LogType::DataUpload
        );
        assert_eq!(
            JobType::Fetch(FetchType::FetchProducts).log_type(),
            LogType::DataFetching
        );
    }

    #[test]
    fn test_file_type_extension_check() {
        assert!(FileType::Csv.matches_file_name("prices.CSV"));
        assert!(FileType::Csv.matches_file_name("prices"));
        assert!(!FileType::Csv.matches_file_name("prices.tsv"));
        assert!(FileType::Tsv.matches_file_name("prices.txt"));
        assert_eq!(FileType::Tsv.delimiter(), b'\t');
    }

    #[test]
    fn test_counters_stay_consistent() {
        let mut counters = JobCounters {
            total_records: 4,
            ..Default::default()
        };
        counters.record(RecordAction::Created);
        counters.record(RecordAction::Updated);
        counters.record(RecordAction::Skipped);
        counters.record(RecordAction::Failed);

        assert_eq!(counters.processed_records, 4);
        assert_eq!(counters.added_records, 1);
        assert_eq!(counters.failed_records, 1);
        assert!(counters.is_consistent());

        counters.record(RecordAction::Created);
        assert!(!counters.is_consistent(), "processed must not exceed total");
    }

    #[test]
    fn test_failed_outcome_yields_error_detail() {
        let outcome = RecordOutcome::failed("INE001", "name is required");
        assert_eq!(
            outcome.error_detail(),
            Some(ErrorDetail::new("INE001", "name is required"))
        );
        assert!(RecordOutcome::applied("INE001", RecordAction::Created)
            .error_detail()
            .is_none());
    }

    #[test]
    fn test_status_finality() {
        assert!(!JobStatus::Pending.is_final());
        assert!(!JobStatus::InProgress.is_final());
        assert!(JobStatus::Completed.is_final());
        assert_eq!("in_progress".parse::<JobStatus>().unwrap(), JobStatus::InProgress);
    }
}
