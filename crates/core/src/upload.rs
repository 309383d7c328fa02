//! Archival upload status and delete scopes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Archival state of an image.
///
/// `pending -> in_progress -> {done | failed}`, and `failed -> pending` on retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    /// Waiting for an archive worker.
    Pending,
    /// Claimed by an archive worker.
    InProgress,
    /// Archived; the remote copy is confirmed.
    Done,
    /// Last attempt failed. May be scheduled for an automatic retry or parked.
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Check whether the archival state machine allows `self -> next`.
    pub fn can_transition_to(&self, next: UploadStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::InProgress, Self::Done)
                | (Self::InProgress, Self::Failed)
                | (Self::Failed, Self::Pending)
        )
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            other => Err(crate::Error::InvalidUploadStatus(other.to_string())),
        }
    }
}

/// Which tiers a delete applies to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteScope {
    /// Remove the local file only; metadata is kept.
    Local,
    /// Remove the remote object only; metadata is kept.
    Remote,
    /// Remove both copies and the metadata record.
    #[default]
    All,
}

impl DeleteScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
            Self::All => "all",
        }
    }

    pub fn includes_local(&self) -> bool {
        matches!(self, Self::Local | Self::All)
    }

    pub fn includes_remote(&self) -> bool {
        matches!(self, Self::Remote | Self::All)
    }
}

impl fmt::Display for DeleteScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeleteScope {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            "all" => Ok(Self::All),
            other => Err(crate::Error::InvalidDeleteScope(other.to_string())),
        }
    }
}
