//! Client-side error taxonomy.

use sandbox_proto::ProtocolError;

/// Errors raised synchronously by `send_request` before anything is sent
///.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("empty argv without an executable file descriptor")]
    EmptyArgv,
    #[error("open(\"\") - No such file or directory (os error 2)")]
    EmptyPath,
    #[error("argument or environment string contains a null byte")]
    EmbeddedNul,
    #[error("mode {0:#o} is out of range 0..=0o777")]
    InvalidMode(u32),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Top-level error surfaced to an awaiter or connection owner.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("{0}")]
    Request(#[from] RequestError),

    /// A short/malformed read or write made the connection unusable; the
    /// supervisor has been (or is about to be) killed and reaped.
    #[error("sandbox: {0}")]
    Protocol(String),

    /// `await_result` was called on a request that had already been
    /// cancelled.
    #[error("request was cancelled")]
    Cancelled,

    /// The supervisor connection died: any bytes accumulated on its error
    /// memfd, concatenated with its own exit status description.
    #[error("sandbox supervisor died unexpectedly: {0}")]
    SupervisorDied(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_error_messages_match_the_spec_wording() {
        assert_eq!(RequestError::EmptyArgv.to_string(), "empty argv without an executable file descriptor");
        assert_eq!(RequestError::EmptyPath.to_string(), "open(\"\") - No such file or directory (os error 2)");
        assert_eq!(
            RequestError::EmbeddedNul.to_string(),
            "argument or environment string contains a null byte"
        );
        assert_eq!(RequestError::InvalidMode(0o1000).to_string(), "mode 0o1000 is out of range 0..=0o777");
    }

    #[test]
    fn sandbox_error_wraps_and_formats_request_error() {
        let err = SandboxError::from(RequestError::EmptyArgv);
        assert_eq!(err.to_string(), "empty argv without an executable file descriptor");
    }

    #[test]
    fn sandbox_error_variants_format_as_expected() {
        assert_eq!(SandboxError::Cancelled.to_string(), "request was cancelled");
        assert_eq!(
            SandboxError::SupervisorDied("exited with 1".to_string()).to_string(),
            "sandbox supervisor died unexpectedly: exited with 1"
        );
        assert_eq!(SandboxError::Protocol("truncated body".to_string()).to_string(), "sandbox: truncated body");
    }
}
