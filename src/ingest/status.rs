//! Document status state machine.
//!
//! `pending -> processing -> {completed | failed}`. Terminal states are final.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Rejected status change
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("invalid status transition {from} -> {to}")]
pub struct TransitionError {
    pub from: DocumentStatus,
    pub to: DocumentStatus,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Failed)
    }

    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        matches!(
            (self, next),
            (DocumentStatus::Pending, DocumentStatus::Processing)
                | (DocumentStatus::Processing, DocumentStatus::Completed)
                | (DocumentStatus::Processing, DocumentStatus::Failed)
        )
    }

    /// Returns `next` if the move is allowed from `self`.
    pub fn transition(self, next: DocumentStatus) -> Result<DocumentStatus, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError { from: self, to: next })
        }
    }

    /// Coarse progress reported to pollers.
    pub fn progress(&self) -> u8 {
        match self {
            DocumentStatus::Pending => 0,
            DocumentStatus::Processing => 50,
            DocumentStatus::Completed | DocumentStatus::Failed => 100,
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DocumentStatus::Pending),
            "processing" => Ok(DocumentStatus::Processing),
            "completed" => Ok(DocumentStatus::Completed),
            "failed" => Ok(DocumentStatus::Failed),
            _ => Err(format!("Unknown document status: {}", s)),
        }
    }
}

impl rusqlite::types::FromSql for DocumentStatus {
    fn column_result(value: rusqlite::types::ValueRef<'_>) -> rusqlite::types::FromSqlResult<Self> {
        let s = value.as_str()?;
        DocumentStatus::from_str(s).map_err(|e| rusqlite::types::FromSqlError::Other(Box::new(std::io::Error::other(e))))
    }
}

impl rusqlite::types::ToSql for DocumentStatus {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        Ok(rusqlite::types::ToSqlOutput::Borrowed(rusqlite::types::ValueRef::Text(
            self.as_str().as_bytes(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DocumentStatus::*;

    const ALL: [DocumentStatus; 4] = [Pending, Processing, Completed, Failed];

    #[test]
    fn test_only_forward_transitions_are_allowed() {
        let allowed = [(Pending, Processing), (Processing, Completed), (Processing, Failed)];
        for from in ALL {
            for to in ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [Completed, Failed] {
            assert!(terminal.is_terminal());
            for to in ALL {
                assert_eq!(terminal.transition(to), Err(TransitionError { from: terminal, to }));
            }
        }
    }

    #[test]
    fn test_pending_cannot_skip_processing() {
        let err = Pending.transition(Completed).unwrap_err();
        assert_eq!(err.to_string(), "invalid status transition pending -> completed");
    }

    #[test]
    fn test_progress() {
        assert_eq!(Pending.progress(), 0);
        assert_eq!(Processing.progress(), 50);
        assert_eq!(Failed.progress(), 100);
    }

    #[test]
    fn test_serde_snake_case() {
        assert_eq!(serde_json::to_string(&Processing).unwrap(), "\"processing\"");
        assert_eq!(DocumentStatus::from_str("failed").unwrap(), Failed);
    }
}
