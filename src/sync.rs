//! The two-role sync state machine.
//!
//! Main walks its index, asking the replica to confirm each file's hash and
//! sending full contents for any mismatch. The replica answers checks,
//! writes received files, and once `Finish` arrives prunes every file it
//! was never asked about. The exchange is strictly request/response per
//! file; there is no pipelining and no retry after authentication.

use std::io;

use crate::connection::{Connection, WireError};
use crate::index::FileIndex;
use crate::message::Message;

/// Counters from one completed run. Fields that don't apply to the role
/// that produced the report stay zero.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Check messages sent (main)
    pub files_checked: usize,
    /// Data messages sent (main)
    pub files_sent: usize,
    /// Data messages written to disk (replica)
    pub files_received: usize,
    /// Checks confirmed matching (replica)
    pub files_matched: usize,
    /// Stale files deleted after Finish (replica)
    pub files_pruned: usize,
}

#[derive(Debug, PartialEq, Eq)]
enum ReplicaState {
    Receiving,
    Done,
}

/// Drives one sync run over an established, authenticated connection.
///
/// Owns the connection (closed exactly once, on drop) and borrows the
/// index for the duration of the run; the replica role is the only
/// mutator.
pub struct Syncer<'a> {
    conn: Connection,
    index: &'a mut FileIndex,
}

impl<'a> Syncer<'a> {
    pub fn new(conn: Connection, index: &'a mut FileIndex) -> Self {
        Self { conn, index }
    }

    /// Runs the initiating role: check every indexed file, send the ones
    /// that differ, then finish.
    pub async fn run_as_main(mut self) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();

        for (file_name, entry) in self.index.entries() {
            self.conn
                .send(&Message::Check {
                    file_name: file_name.clone(),
                    hash: entry.hash.clone(),
                })
                .await?;
            report.files_checked += 1;

            let matched = match self.conn.recv().await? {
                Message::MatchResult {
                    file_name: ref reply_name,
                    matched,
                } if reply_name == file_name => matched,
                other => {
                    return Err(SyncError::Protocol(format!(
                        "expected a match reply for '{}', got {}",
                        file_name,
                        other.kind_name()
                    )))
                }
            };
            tracing::debug!(file = %file_name, matched, "check answered");

            if !matched {
                let bytes = self
                    .index
                    .read_file(file_name)
                    .map_err(|e| SyncError::FileRead(file_name.clone(), e))?;
                tracing::debug!(file = %file_name, size = bytes.len(), "sending data");
                self.conn
                    .send(&Message::Data {
                        file_name: file_name.clone(),
                        bytes,
                    })
                    .await?;
                report.files_sent += 1;
            }
        }

        self.conn.send(&Message::Finish).await?;
        tracing::info!(
            checked = report.files_checked,
            sent = report.files_sent,
            "main run complete"
        );
        Ok(report)
    }

    /// Runs the responding role: answer checks and write received files
    /// until `Finish`, then prune everything never confirmed.
    pub async fn run_as_replica(mut self) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();
        let mut state = ReplicaState::Receiving;

        while state == ReplicaState::Receiving {
            match self.conn.recv().await? {
                Message::Finish => {
                    tracing::debug!("finish received");
                    state = ReplicaState::Done;
                }
                Message::Check { file_name, hash } => {
                    let matched = self
                        .index
                        .get(&file_name)
                        .is_some_and(|entry| entry.hash == hash);
                    tracing::debug!(file = %file_name, matched, "answering check");
                    self.conn
                        .send(&Message::MatchResult {
                            file_name: file_name.clone(),
                            matched,
                        })
                        .await?;
                    if matched {
                        self.index.mark_synced(&file_name);
                        report.files_matched += 1;
                    }
                }
                Message::Data { file_name, bytes } => {
                    if file_name.contains(['/', '\\']) || file_name == ".." {
                        return Err(SyncError::Protocol(format!(
                            "refusing unsafe file name '{}'",
                            file_name
                        )));
                    }
                    tracing::debug!(file = %file_name, size = bytes.len(), "writing received file");
                    self.index
                        .write_file(&file_name, &bytes)
                        .map_err(|e| SyncError::FileWrite(file_name.clone(), e))?;
                    self.index.insert_synced(&file_name);
                    report.files_received += 1;
                }
                Message::MatchResult { .. } => {
                    return Err(SyncError::Protocol(
                        "replica received a match reply".to_string(),
                    ))
                }
                other => {
                    return Err(SyncError::Protocol(format!(
                        "unexpected {} message during sync",
                        other.kind_name()
                    )))
                }
            }
        }

        for file_name in self.index.unsynced() {
            self.index
                .remove_file(&file_name)
                .map_err(|e| SyncError::FileDelete(file_name.clone(), e))?;
            tracing::debug!(file = %file_name, "pruned stale file");
            report.files_pruned += 1;
        }

        tracing::info!(
            received = report.files_received,
            matched = report.files_matched,
            pruned = report.files_pruned,
            "replica run complete"
        );
        Ok(report)
    }
}

/// Errors from a sync run. All are fatal; no message is ever retried.
#[derive(Debug)]
pub enum SyncError {
    /// Frame-level send/receive failure
    Wire(WireError),
    /// A well-formed message arrived in a state that does not expect it
    Protocol(String),
    /// Main could not read a file it needs to send
    FileRead(String, io::Error),
    /// Replica could not write a received file
    FileWrite(String, io::Error),
    /// Replica could not delete a stale file
    FileDelete(String, io::Error),
}

impl From<WireError> for SyncError {
    fn from(e: WireError) -> Self {
        SyncError::Wire(e)
    }
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Wire(e) => write!(f, "{}", e),
            SyncError::Protocol(e) => write!(f, "Protocol violation: {}", e),
            SyncError::FileRead(name, e) => write!(f, "Failed to read '{}': {}", name, e),
            SyncError::FileWrite(name, e) => write!(f, "Failed to write '{}': {}", name, e),
            SyncError::FileDelete(name, e) => write!(f, "Failed to delete '{}': {}", name, e),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::Wire(e) => Some(e),
            SyncError::Protocol(_) => None,
            SyncError::FileRead(_, e)
            | SyncError::FileWrite(_, e)
            | SyncError::FileDelete(_, e) => Some(e),
        }
    }
}
