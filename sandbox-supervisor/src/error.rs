//! pid1/tracee phase failures. Every phase function returns
//! `Result<T, PhaseError>`; the top-level runner in `pid1.rs`/`tracee.rs`
//! renders the first error as `"<op> - <errno string>"`, has the caller
//! prepend the `"pid1: "`/`"tracee: "` prefix, writes it into the relevant
//! shared-memory page, and `_exit(1)`s. Grounded on `pid1.cc`/`tracee.cc`'s
//! `die_with_error` closures, which do the same string assembly with
//! `errmsg()` appended to the failing operation's name.

use std::fmt;
use std::io;

pub struct PhaseError {
    op: &'static str,
    cause: io::Error,
}

pub type PhaseResult<T> = Result<T, PhaseError>;

impl PhaseError {
    pub fn new(op: &'static str, cause: io::Error) -> Self {
        Self { op, cause }
    }

    /// Builds a `PhaseError` from `errno` as it stood right after `op` failed.
    pub fn errno(op: &'static str) -> Self {
        Self::new(op, io::Error::last_os_error())
    }

    /// A failure with no underlying errno (e.g. a sanity-check violation).
    pub fn msg(op: &'static str, why: &str) -> Self {
        Self::new(op, io::Error::new(io::ErrorKind::Other, why.to_string()))
    }
}

impl fmt::Display for PhaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.op, self.cause)
    }
}

pub trait ErrnoExt<T> {
    /// Converts a raw syscall return value convention (`< 0` on failure) into
    /// a `PhaseResult`, reading `errno` eagerly before anything else can
    /// clobber it.
    fn or_errno(self, op: &'static str) -> PhaseResult<T>;
}

impl ErrnoExt<i64> for i64 {
    fn or_errno(self, op: &'static str) -> PhaseResult<i64> {
        if self < 0 {
            Err(PhaseError::errno(op))
        } else {
            Ok(self)
        }
    }
}

impl ErrnoExt<i32> for i32 {
    fn or_errno(self, op: &'static str) -> PhaseResult<i32> {
        if self < 0 {
            Err(PhaseError::errno(op))
        } else {
            Ok(self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_op_and_cause() {
        let err = PhaseError::new("open(/dev/null)", io::Error::new(io::ErrorKind::NotFound, "no such file"));
        assert_eq!(err.to_string(), "open(/dev/null) - no such file");
    }

    #[test]
    fn msg_builds_an_errorless_phase_error() {
        let err = PhaseError::msg("execveat()", "argv must contain at least argv[0]");
        assert_eq!(err.to_string(), "execveat() - argv must contain at least argv[0]");
    }

    #[test]
    fn or_errno_passes_through_non_negative_values() {
        assert_eq!(5i32.or_errno("op").unwrap(), 5);
        assert_eq!(0i64.or_errno("op").unwrap(), 0);
    }

    #[test]
    fn or_errno_errors_on_negative_values() {
        assert!((-1i32).or_errno("clone3()").is_err());
    }
}
