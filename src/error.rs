//! Mapping of coordinator outcomes to process exit statuses.

use std::process::ExitCode;

use crate::{
    ceremony::{CeremonyError, RegistrationError},
    config::ConfigError,
    decrypt::{DecryptionError, DecryptionResult},
};

/// Exit status of a coordinator process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExitStatus {
    /// The protocol completed.
    Success = 0,
    /// Invalid configuration or usage.
    BadArguments = 1,
    /// Published or received data failed validation.
    ValidationFailure = 2,
    /// The protocol could not be completed, e.g. because a guardian failed.
    ProtocolFailure = 3,
}

impl ExitStatus {
    /// Returns the numeric exit code.
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        Self::from(status.code())
    }
}

impl From<&ConfigError> for ExitStatus {
    fn from(_: &ConfigError) -> Self {
        Self::BadArguments
    }
}

impl From<&RegistrationError> for ExitStatus {
    fn from(err: &RegistrationError) -> Self {
        match err {
            RegistrationError::RecordMismatch { .. } => Self::ValidationFailure,
            _ => Self::BadArguments,
        }
    }
}

impl From<&CeremonyError> for ExitStatus {
    fn from(err: &CeremonyError) -> Self {
        match err {
            CeremonyError::AlreadyRun => Self::BadArguments,
            CeremonyError::InvalidPublicKeys { .. } | CeremonyError::IdentityMismatch { .. } => {
                Self::ValidationFailure
            }
            _ => Self::ProtocolFailure,
        }
    }
}

impl From<&DecryptionError> for ExitStatus {
    fn from(err: &DecryptionError) -> Self {
        match err {
            DecryptionError::QuorumViolation { .. }
            | DecryptionError::Config(_)
            | DecryptionError::AlreadyStarted
            | DecryptionError::DuplicateBallot(_) => Self::BadArguments,
            DecryptionError::InvalidKeyCeremony(_) => Self::ValidationFailure,
            _ => Self::ProtocolFailure,
        }
    }
}

impl From<&DecryptionResult> for ExitStatus {
    fn from(result: &DecryptionResult) -> Self {
        if result.is_complete() {
            Self::Success
        } else {
            Self::ProtocolFailure
        }
    }
}

impl<T> From<&Result<T, CeremonyError>> for ExitStatus {
    fn from(result: &Result<T, CeremonyError>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(err) => Self::from(err),
        }
    }
}

impl<T> From<&Result<T, DecryptionError>> for ExitStatus {
    fn from(result: &Result<T, DecryptionError>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(err) => Self::from(err),
        }
    }
}
