//! Accounting handlers
//!
//! The server hands every accepted Accounting-Request to an
//! [`AccountingHandler`]. Persistence is entirely the handler's business:
//! returning `Ok(())` makes the server acknowledge the request, returning an
//! error leaves the request unanswered so the NAS retries it later.

use crate::record::AccountingRecord;
use async_trait::async_trait;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Record rejected: {0}")]
    Rejected(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Consumer of accounting records
#[async_trait]
pub trait AccountingHandler: Send + Sync {
    /// Process one record; an error suppresses the Accounting-Response
    async fn handle(&self, record: AccountingRecord) -> Result<(), HandlerError>;
}

/// Handler backed by an async closure, see [`handler_fn`]
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> AccountingHandler for FnHandler<F>
where
    F: Fn(AccountingRecord) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, record: AccountingRecord) -> Result<(), HandlerError> {
        (self.f)(record).await
    }
}

/// Wrap an async closure as a handler
///
/// ```rust
/// use radius_acct::handler_fn;
///
/// let handler = handler_fn(|record| async move {
///     println!("{} from {}", record.key, record.remote_addr);
///     Ok(())
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn AccountingHandler>
where
    F: Fn(AccountingRecord) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// Writes each record as one JSON object per line
///
/// The JSON Lines format can be processed with standard tools like jq.
pub struct JsonLinesHandler {
    /// Destination file, `None` for stdout
    path: Option<PathBuf>,
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl JsonLinesHandler {
    /// Append records to a file, creating it and its parent directories
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(JsonLinesHandler {
            path: Some(path),
            writer: Mutex::new(Box::new(file)),
        })
    }

    /// Write records to standard output
    pub fn stdout() -> Self {
        JsonLinesHandler {
            path: None,
            writer: Mutex::new(Box::new(tokio::io::stdout())),
        }
    }

    /// File the records go to, `None` when writing to stdout
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[async_trait]
impl AccountingHandler for JsonLinesHandler {
    async fn handle(&self, record: AccountingRecord) -> Result<(), HandlerError> {
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::TranslatedAttribute;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn record(id: &str) -> AccountingRecord {
        AccountingRecord {
            id: id.to_string(),
            authenticator: "00".repeat(16),
            code: "Accounting-Request".to_string(),
            key: format!("{}_{}", id, "00".repeat(16)),
            remote_addr: "127.0.0.1:1000".to_string(),
            attributes: vec![TranslatedAttribute {
                name: "Acct-Session-Id".to_string(),
                value: "abc".to_string(),
            }],
        }
    }

    #[tokio::test]
    async fn test_handler_fn() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handler = handler_fn(move |record: AccountingRecord| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if record.id == "0x2" {
                    return Err(HandlerError::Rejected("no".to_string()));
                }
                Ok(())
            }
        });

        assert!(handler.handle(record("0x1")).await.is_ok());
        assert!(matches!(
            handler.handle(record("0x2")).await,
            Err(HandlerError::Rejected(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_json_lines_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("acct").join("records.jsonl");

        let handler = JsonLinesHandler::open(&path).await.unwrap();
        assert_eq!(handler.path(), Some(path.as_path()));
        handler.handle(record("0x1")).await.unwrap();
        handler.handle(record("0x2")).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<AccountingRecord> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(lines, vec![record("0x1"), record("0x2")]);
    }

    #[tokio::test]
    async fn test_json_lines_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.jsonl");

        JsonLinesHandler::open(&path)
            .await
            .unwrap()
            .handle(record("0x1"))
            .await
            .unwrap();
        JsonLinesHandler::open(&path)
            .await
            .unwrap()
            .handle(record("0x2"))
            .await
            .unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
