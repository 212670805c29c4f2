//! Client credential records and the pipe-delimited credential file.
//!
//! One client per line: `client_id|username|password`. Line order is the
//! client index on reload.

use std::path::Path;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::error::{Error, Result};

const DELIMITER: char = '|';

/// Identity and credentials of one simulated client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientRecord {
    pub index: usize,
    pub client_id: String,
    pub username: String,
    pub password: String,
}

impl ClientRecord {
    #[must_use]
    pub fn new(
        index: usize,
        client_id: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            index,
            client_id: client_id.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    /// Check that every field can be stored on one delimited line.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Error::InvalidCredentialRecord {
            line: self.index + 1,
            reason,
        };
        if self.client_id.is_empty() {
            return Err(invalid("empty client id".to_string()));
        }
        for (name, value) in [
            ("client id", &self.client_id),
            ("username", &self.username),
            ("password", &self.password),
        ] {
            if value.contains(DELIMITER) || value.contains(['\n', '\r']) {
                return Err(invalid(format!("{} contains a delimiter or newline", name)));
            }
        }
        Ok(())
    }

    /// Serialize as `client_id|username|password` (no newline).
    #[must_use]
    pub fn to_line(&self) -> String {
        format!(
            "{}{d}{}{d}{}",
            self.client_id,
            self.username,
            self.password,
            d = DELIMITER
        )
    }

    /// Parse one line of a credential file. `index` is zero-based and is
    /// also used to report the line number.
    pub fn parse_line(index: usize, line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\n', '\r']);
        let mut fields = line.split(DELIMITER);
        let (Some(client_id), Some(username), Some(password), None) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(Error::InvalidCredentialRecord {
                line: index + 1,
                reason: format!("expected 3 '{}'-separated fields", DELIMITER),
            });
        };
        if client_id.is_empty() {
            return Err(Error::InvalidCredentialRecord {
                line: index + 1,
                reason: "empty client id".to_string(),
            });
        }
        Ok(Self::new(index, client_id, username, password))
    }
}

/// Shared credential sink. Each record is written as one complete line
/// under a lock, so concurrent provisioners never interleave.
#[derive(Debug)]
pub struct CredentialWriter {
    file: Mutex<File>,
}

impl CredentialWriter {
    /// Create (or truncate) the file at `path`.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path).await?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Open `path` for appending, creating it if missing.
    pub async fn append(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Append one record as a single line and flush it.
    pub async fn write(&self, record: &ClientRecord) -> Result<()> {
        record.validate()?;
        let mut line = record.to_line();
        line.push('\n');

        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Flush file contents to disk.
    pub async fn sync(&self) -> Result<()> {
        self.file.lock().await.sync_all().await?;
        Ok(())
    }
}

/// Read up to `limit` records from `path` in file order. Blank lines are
/// skipped and do not consume an index.
pub async fn read_records(path: impl AsRef<Path>, limit: usize) -> Result<Vec<ClientRecord>> {
    let file = File::open(path).await?;
    let mut lines = BufReader::new(file).lines();
    let mut records = Vec::new();
    let mut line_no = 0usize;

    while records.len() < limit {
        let Some(line) = lines.next_line().await? else {
            break;
        };
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let record = ClientRecord::parse_line(records.len(), &line).map_err(|e| match e {
            Error::InvalidCredentialRecord { reason, .. } => Error::InvalidCredentialRecord {
                line: line_no,
                reason,
            },
            other => other,
        })?;
        records.push(record);
    }

    Ok(records)
}
