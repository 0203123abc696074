//! Exit code definitions for the kracli binary
//!
//! Scripts rely on these values, keep them stable.

use kracli_core::{Error, ResponseEnvelope};

/// Process exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Operation completed, or the API answered with data or success
    Success = 0,

    /// Generic failure: transport, protocol, configuration, offset mismatch
    Failure = 1,

    /// The API answered with an error, or the local file was unusable
    ApplicationError = 2,

    /// Interrupted with Ctrl+C
    Interrupted = 130,
}

impl ExitCode {
    /// Convert exit code to i32 for use with std::process::exit
    #[inline]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Exit code of a printed API reply
    pub fn for_envelope(envelope: &ResponseEnvelope) -> Self {
        match envelope {
            ResponseEnvelope::Data(_) | ResponseEnvelope::Success { .. } => Self::Success,
            ResponseEnvelope::Error { .. } => Self::ApplicationError,
        }
    }

    /// Exit code of a failed operation
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::Cancelled => Self::Interrupted,
            Error::Envelope(envelope) => Self::for_envelope(envelope),
            Error::Application { .. }
            | Error::LocalFile(_)
            | Error::EmptyFile(_)
            | Error::SizeMismatch { .. } => Self::ApplicationError,
            _ => Self::Failure,
        }
    }

    /// Exit code of a handler error; anything outside the core taxonomy is a failure
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        err.downcast_ref::<Error>()
            .map(Self::from_error)
            .unwrap_or(Self::Failure)
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.as_i32()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    #[test]
    fn test_exit_code_values() {
        assert_eq!(ExitCode::Success.as_i32(), 0);
        assert_eq!(ExitCode::Failure.as_i32(), 1);
        assert_eq!(ExitCode::ApplicationError.as_i32(), 2);
        assert_eq!(ExitCode::Interrupted.as_i32(), 130);
    }

    #[test]
    fn test_envelope_codes() {
        assert_eq!(
            ExitCode::for_envelope(&ResponseEnvelope::Data(json!({"ident": "abc"}))),
            ExitCode::Success
        );
        assert_eq!(
            ExitCode::for_envelope(&ResponseEnvelope::Error {
                error: json!("not_found"),
                msg: None,
            }),
            ExitCode::ApplicationError
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ExitCode::from_error(&Error::Cancelled), ExitCode::Interrupted);
        assert_eq!(
            ExitCode::from_error(&Error::LocalFile(PathBuf::from("x"))),
            ExitCode::ApplicationError
        );
        assert_eq!(
            ExitCode::from_error(&Error::SizeMismatch { local: 1, remote: 2 }),
            ExitCode::ApplicationError
        );
        assert_eq!(
            ExitCode::from_error(&Error::Transport("reset".to_string())),
            ExitCode::Failure
        );
        assert_eq!(ExitCode::from_error(&Error::NothingToEdit), ExitCode::Failure);
        assert_eq!(
            ExitCode::from_error(&Error::AlreadyExists(PathBuf::from("x"))),
            ExitCode::Failure
        );
    }

    #[test]
    fn test_anyhow_downcast() {
        let err = anyhow::Error::new(Error::EmptyFile(PathBuf::from("x")));
        assert_eq!(ExitCode::from_anyhow(&err), ExitCode::ApplicationError);

        let other = anyhow::anyhow!("something else");
        assert_eq!(ExitCode::from_anyhow(&other), ExitCode::Failure);

        let code: i32 = ExitCode::Interrupted.into();
        assert_eq!(code, 130);
    }
}
