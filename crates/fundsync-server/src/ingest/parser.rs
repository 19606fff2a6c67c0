//! Record sources
//!
//! A [`RecordSource`] yields [`SourceItem`]s one at a time and cannot be
//! rewound. Uploaded files are read on a blocking thread and streamed through
//! a bounded channel, so the engine never holds a whole file in memory.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::debug;

use super::error::{EngineAbort, RecordError, SubmissionError};
use super::records::TypedRecord;
use super::schema::RowLayout;
use super::types::{FileType, UploadType};

/// Rows buffered between the file reader and the engine
pub const SOURCE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
pub enum SourceItem {
    /// A decoded record
    Record(TypedRecord),
    /// A record that could not be decoded; becomes a FAILED outcome
    Rejected { identifier: String, error: RecordError },
    /// The source cannot continue; fails the job
    Abort(EngineAbort),
}

enum Feed {
    Channel(mpsc::Receiver<SourceItem>),
    Buffered(VecDeque<SourceItem>),
}

pub struct RecordSource {
    feed: Feed,
    total: i64,
}

impl RecordSource {
    /// Source over items that are already in memory (fetched catalogs)
    pub fn from_items(total: i64, items: Vec<SourceItem>) -> Self {
        Self {
            feed: Feed::Buffered(items.into()),
            total,
        }
    }

    fn from_channel(total: i64, rx: mpsc::Receiver<SourceItem>) -> Self {
        Self {
            feed: Feed::Channel(rx),
            total,
        }
    }

    /// Number of items this source will yield if it is not aborted
    pub fn total(&self) -> i64 {
        self.total
    }

    pub async fn next(&mut self) -> Option<SourceItem> {
        match &mut self.feed {
            Feed::Channel(rx) => rx.recv().await,
            Feed::Buffered(items) => items.pop_front(),
        }
    }
}

fn reader_builder(file_type: FileType) -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder
        .delimiter(file_type.delimiter())
        .has_headers(true)
        .flexible(true);
    builder
}

/// Submission-time check of an upload: readable, header matches, at least one data row
pub async fn inspect_upload(
    path: PathBuf,
    file_type: FileType,
    upload_type: UploadType,
) -> Result<(), SubmissionError> {
    tokio::task::spawn_blocking(move || {
        let mut reader = reader_builder(file_type)
            .from_path(&path)
            .map_err(|e| SubmissionError::Unreadable(e.to_string()))?;

        let headers = reader
            .headers()
            .map_err(|e| SubmissionError::Unreadable(e.to_string()))?
            .clone();
        RowLayout::resolve(upload_type, headers.iter()).map_err(|reason| {
            SubmissionError::HeaderMismatch {
                upload_type: upload_type.to_string(),
                reason,
            }
        })?;

        let mut record = csv::ByteRecord::new();
        match reader.read_byte_record(&mut record) {
            Ok(true) => Ok(()),
            Ok(false) => Err(SubmissionError::NoDataRows),
            Err(e) if e.is_io_error() => Err(SubmissionError::Unreadable(e.to_string())),
            // a malformed first row is still a data row; it fails on its own later
            Err(_) => Ok(()),
        }
    })
    .await
    .map_err(|e| SubmissionError::Unreadable(format!("inspection task failed: {}", e)))?
}

/// Count data rows with the same reader settings the streaming pass uses
pub async fn count_records(path: PathBuf, file_type: FileType) -> Result<i64, EngineAbort> {
    tokio::task::spawn_blocking(move || {
        let mut reader = reader_builder(file_type)
            .from_path(&path)
            .map_err(|e| unreadable(&path, e))?;

        let mut record = csv::ByteRecord::new();
        let mut count = 0i64;
        loop {
            match reader.read_byte_record(&mut record) {
                Ok(true) => count += 1,
                Ok(false) => break,
                Err(e) if e.is_io_error() => return Err(unreadable(&path, e)),
                Err(_) => count += 1,
            }
        }
        Ok(count)
    })
    .await
    .map_err(|e| EngineAbort::Structural(format!("row count task failed: {}", e)))?
}

fn unreadable(path: &Path, err: csv::Error) -> EngineAbort {
    EngineAbort::Structural(format!("upload {} could not be read: {}", path.display(), err))
}

/// Stream an upload's rows as typed records
pub fn open_upload(path: PathBuf, file_type: FileType, upload_type: UploadType, total: i64) -> RecordSource {
    let (tx, rx) = mpsc::channel(SOURCE_CHANNEL_CAPACITY);
    tokio::task::spawn_blocking(move || stream_rows(&path, file_type, upload_type, &tx));
    RecordSource::from_channel(total, rx)
}

fn stream_rows(path: &Path, file_type: FileType, upload_type: UploadType, tx: &mpsc::Sender<SourceItem>) {
    let abort = |abort: EngineAbort| {
        // the receiver is gone only when the job has already ended
        let _ = tx.blocking_send(SourceItem::Abort(abort));
    };

    let mut reader = match reader_builder(file_type).from_path(path) {
        Ok(reader) => reader,
        Err(e) => return abort(unreadable(path, e)),
    };

    let layout = match reader.headers() {
        Ok(headers) => match RowLayout::resolve(upload_type, headers.iter()) {
            Ok(layout) => layout,
            Err(reason) => {
                return abort(EngineAbort::Structural(format!(
                    "header does not match the {} layout: {}",
                    upload_type, reason
                )))
            },
        },
        Err(e) => return abort(unreadable(path, e)),
    };

    let mut record = csv::StringRecord::new();
    let mut rows_read: u64 = 0;

    loop {
        let result = reader.read_record(&mut record);
        rows_read += 1;
        // header occupies line 1
        let fallback_line = rows_read + 1;

        let item = match result {
            Ok(false) => break,
            Ok(true) => {
                let line = record.position().map_or(fallback_line, |p| p.line());
                match layout.decode(&record, line) {
                    Ok(typed) => SourceItem::Record(typed),
                    Err((identifier, error)) => SourceItem::Rejected { identifier, error },
                }
            },
            Err(e) if e.is_io_error() => SourceItem::Abort(unreadable(path, e)),
            Err(e) => {
                let line = e.position().map_or(fallback_line, |p| p.line());
                SourceItem::Rejected {
                    identifier: format!("row {}", line),
                    error: RecordError::Unreadable(e.to_string()),
                }
            },
        };

        let stop = matches!(item, SourceItem::Abort(_));
        if tx.blocking_send(item).is_err() {
            debug!(path = %path.display(), "Record consumer dropped, stopping reader");
            break;
        }
        if stop {
            break;
        }
    }
}
