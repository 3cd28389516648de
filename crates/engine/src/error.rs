//! Error taxonomy for challenge operations

use persistence::DbError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChallengeError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Already joined this challenge")]
    AlreadyJoined,

    #[error("Daily target is already set and cannot be changed")]
    TargetLocked,

    #[error("Team not found: {0}")]
    InvalidTeam(String),

    #[error("Invalid daily target {0}, must be one of 3000, 5000, 7500, 10000")]
    InvalidTarget(u32),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Not a participant of this challenge")]
    NotAParticipant,

    #[error(transparent)]
    Storage(#[from] DbError),
}

/// Stable classification callers map to transport status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidInput,
    Forbidden,
    NotAParticipant,
    Internal,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::InvalidInput => "invalid_input",
            Self::Forbidden => "forbidden",
            Self::NotAParticipant => "not_a_participant",
            Self::Internal => "internal",
        }
    }
}

impl ChallengeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) | Self::InvalidTeam(_) => ErrorKind::NotFound,
            Self::AlreadyJoined | Self::TargetLocked => ErrorKind::Conflict,
            Self::InvalidTarget(_) | Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::NotAParticipant => ErrorKind::NotAParticipant,
            Self::Storage(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

pub type ChallengeResult<T> = Result<T, ChallengeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(ChallengeError::AlreadyJoined.kind(), ErrorKind::Conflict);
        assert_eq!(ChallengeError::TargetLocked.kind(), ErrorKind::Conflict);
        assert_eq!(ChallengeError::InvalidTarget(4000).kind(), ErrorKind::InvalidInput);
        assert_eq!(ChallengeError::InvalidTeam("t".into()).kind(), ErrorKind::NotFound);
        assert_eq!(ChallengeError::NotAParticipant.kind().code(), "not_a_participant");
        assert_eq!(
            ChallengeError::Storage(DbError::Query("boom".into())).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            ChallengeError::not_found("Challenge").to_string(),
            "Challenge not found"
        );
        assert!(ChallengeError::InvalidTarget(4000).to_string().contains("4000"));
    }
}
