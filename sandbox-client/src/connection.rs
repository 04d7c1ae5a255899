//! Client connection (C4) and the request lifecycle state machine. Grounded on
//! `original_source/simlib/src/sandbox/sandbox.cc` (`SupervisorConnection`
//! destructor / `kill_and_wait_supervisor[_and_receive_errors]`) and
//! `client/request/serialize.cc` (request encoding order).

use std::ffi::CString;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Mutex;

use sandbox_proto::wire::{self, fds_mask};
use sandbox_proto::{MountOperation, Outcome, RequestOptions, Si};

use crate::error::{RequestError, SandboxError};
use crate::fd::{recv_exact, send_header_with_fds_then_body};

/// What to execute: a file descriptor the caller already holds open, or a
/// path the client opens itself.
pub enum ExecutableSelector<'a> {
    Fd(RawFd),
    Path(&'a str),
}

fn open_executable(selector: ExecutableSelector) -> Result<OwnedFd, RequestError> {
    match selector {
        ExecutableSelector::Fd(fd) => {
            // Duplicate so the caller keeps ownership of the fd they passed in.
            let dup = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 0) };
            if dup < 0 {
                return Err(RequestError::Io(io::Error::last_os_error()));
            }
            Ok(unsafe { OwnedFd::from_raw_fd(dup) })
        }
        ExecutableSelector::Path(path) => {
            if path.is_empty() {
                return Err(RequestError::EmptyPath);
            }
            let cpath = CString::new(path).map_err(|_| RequestError::EmbeddedNul)?;
            let fd = unsafe { libc::open(cpath.as_ptr(), libc::O_RDONLY | libc::O_CLOEXEC) };
            if fd < 0 {
                return Err(RequestError::Io(io::Error::last_os_error()));
            }
            Ok(unsafe { OwnedFd::from_raw_fd(fd) })
        }
    }
}

const MODE_MAX: u16 = 0o777;

/// Rejects any `root_dir_mode`/`mode` outside `0..=0o777` before a request is
/// ever serialized or sent, per the fixed range in spec §3.1.
fn validate_modes(operations: &[MountOperation]) -> Result<(), RequestError> {
    for op in operations {
        let mode = match op {
            MountOperation::MountTmpfs { root_dir_mode, .. } => Some(*root_dir_mode),
            MountOperation::CreateDir { mode, .. } => Some(*mode),
            MountOperation::CreateFile { mode, .. } => Some(*mode),
            MountOperation::MountProc { .. } | MountOperation::BindMount { .. } => None,
        };
        if let Some(mode) = mode {
            if mode > MODE_MAX {
                return Err(RequestError::InvalidMode(mode as u32));
            }
        }
    }
    Ok(())
}

/// Per-request borrowed standard-stream and seccomp-filter descriptors
///.
#[derive(Default)]
pub struct RequestFds {
    pub stdin_fd: Option<RawFd>,
    pub stdout_fd: Option<RawFd>,
    pub stderr_fd: Option<RawFd>,
    pub seccomp_bpf_fd: Option<RawFd>,
}

enum ConnState {
    Alive,
    Dead,
}

/// A long-lived connection to one supervisor process. Not thread-safe for concurrent `send_request`/
/// `await_result` — callers must serialize those themselves; `cancel`
/// and `kill` on handles it has already produced remain safe to call
/// concurrently because they only touch independent descriptors.
pub struct SupervisorConnection {
    sock_fd: OwnedFd,
    supervisor_pidfd: OwnedFd,
    supervisor_error_fd: OwnedFd,
    state: Mutex<ConnState>,
}

/// Owns the per-request control descriptors and tracks which terminal state
/// the request has reached.
pub struct RequestHandle {
    result_fd: Option<OwnedFd>,
    kill_fd: Option<OwnedFd>,
    awaited: bool,
}

/// A `kill_fd` detached from its `RequestHandle`.
pub struct KillRequestHandle {
    kill_fd: Mutex<Option<OwnedFd>>,
}

impl KillRequestHandle {
    /// Requests that the tracee's process tree be killed. A no-op once the
    /// request has already finished or been killed before.
    pub fn kill(&self) {
        let mut guard = self.kill_fd.lock().unwrap();
        if let Some(fd) = guard.take() {
            let one: u64 = 1;
            unsafe {
                libc::write(fd.as_raw_fd(), &one as *const u64 as *const _, 8);
            }
            // fd closes when dropped here.
        }
    }
}

impl RequestHandle {
    /// Closes `result_fd`, making any pending or future read on it observe
    /// EOF. Idempotent: calling it again on an already-cancelled handle is a
    /// no-op.
    pub fn cancel(&mut self) {
        self.result_fd = None;
    }

    /// Detaches the kill descriptor so it can be held (and triggered)
    /// independently of this handle's lifetime.
    pub fn get_kill_handle(&mut self) -> KillRequestHandle {
        KillRequestHandle {
            kill_fd: Mutex::new(self.kill_fd.take()),
        }
    }
}

impl Drop for RequestHandle {
    fn drop(&mut self) {
        // "On destruction, if not cancelled and not awaited, it cancels"
        //. Dropping `result_fd` achieves exactly that.
        if !self.awaited {
            self.result_fd = None;
        }
    }
}

impl SupervisorConnection {
    pub(crate) fn new(sock_fd: OwnedFd, supervisor_pidfd: OwnedFd, supervisor_error_fd: OwnedFd) -> Self {
        Self {
            sock_fd,
            supervisor_pidfd,
            supervisor_error_fd,
            state: Mutex::new(ConnState::Alive),
        }
    }

    /// Encodes and sends one request.
    pub fn send_request(
        &self,
        executable: ExecutableSelector,
        argv: &[Vec<u8>],
        fds: RequestFds,
        options: RequestOptions,
    ) -> Result<RequestHandle, SandboxError> {
        if argv.is_empty() {
            if let ExecutableSelector::Fd(_) = executable {
                // An FD selector with empty argv is still a user error: the
                // tracee needs at least argv[0].
                return Err(SandboxError::Request(RequestError::EmptyArgv));
            }
        }

        validate_modes(&options.linux_namespaces.mount.operations).map_err(SandboxError::Request)?;

        let executable_fd = open_executable(executable).map_err(SandboxError::Request)?;

        let mut fds_mask_value = 0u8;
        if fds.stdin_fd.is_some() {
            fds_mask_value |= fds_mask::STDIN;
        }
        if fds.stdout_fd.is_some() {
            fds_mask_value |= fds_mask::STDOUT;
        }
        if fds.stderr_fd.is_some() {
            fds_mask_value |= fds_mask::STDERR;
        }
        if fds.seccomp_bpf_fd.is_some() {
            fds_mask_value |= fds_mask::SECCOMP_BPF;
        }

        let body = wire::encode_request(fds_mask_value, argv, &options)
            .map_err(RequestError::Protocol)
            .map_err(SandboxError::Request)?;
        let header = wire::encode_header(body.len() as u64);

        let (result_read, result_write) = pipe_cloexec().map_err(SandboxError::Io)?;
        let kill_fd = eventfd_cloexec().map_err(SandboxError::Io)?;

        let mut ancillary = vec![executable_fd.as_raw_fd()];
        for fd in [fds.stdin_fd, fds.stdout_fd, fds.stderr_fd, fds.seccomp_bpf_fd]
            .into_iter()
            .flatten()
        {
            ancillary.push(fd);
        }
        ancillary.push(result_write.as_raw_fd());
        ancillary.push(kill_fd.as_raw_fd());

        send_header_with_fds_then_body(self.sock_fd.as_raw_fd(), &header, &ancillary, &body)
            .map_err(SandboxError::Io)?;

        // The supervisor now owns the write end; our copy is only needed to
        // pass it over SCM_RIGHTS.
        drop(result_write);

        Ok(RequestHandle {
            result_fd: Some(result_read),
            kill_fd: Some(kill_fd),
            awaited: false,
        })
    }

    /// Blocks until the supervisor's response for `handle` arrives, or the
    /// request was cancelled.
    pub fn await_result(&self, mut handle: RequestHandle) -> Result<Outcome, SandboxError> {
        let Some(result_fd) = handle.result_fd.take() else {
            return Err(SandboxError::Cancelled);
        };
        handle.awaited = true;

        match self.read_response(result_fd.as_raw_fd()) {
            Ok(outcome) => Ok(outcome),
            Err(_) => Err(self.kill_and_wait_supervisor_and_receive_errors()),
        }
    }

    fn read_response(&self, fd: RawFd) -> io::Result<Outcome> {
        let mut prefix = [0u8; 4];
        if !recv_exact(fd, &mut prefix)? {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "result_fd closed before any response bytes"));
        }
        let error_len = wire::decode_response_prefix(prefix);
        if error_len == 0 {
            let mut body = [0u8; wire::RESPONSE_OK_BODY_LEN];
            if !recv_exact(fd, &mut body)? {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "result_fd closed mid-response"));
            }
            wire::decode_response_ok(&body)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
        } else {
            let mut body = vec![0u8; error_len as usize];
            if !recv_exact(fd, &mut body)? {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "result_fd closed mid-response"));
            }
            wire::decode_response_error(&body)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
        }
    }

    /// Kills and reaps the supervisor, surfacing any accumulated error bytes
    /// concatenated with its own `Si` description.
    fn kill_and_wait_supervisor_and_receive_errors(&self) -> SandboxError {
        let mut state = self.state.lock().unwrap();
        *state = ConnState::Dead;

        let send_signal_result =
            pidfd_send_signal(self.supervisor_pidfd.as_raw_fd(), libc::SIGKILL);
        let si = waitid_pidfd(self.supervisor_pidfd.as_raw_fd());

        if let Err(e) = send_signal_result {
            return SandboxError::Io(e);
        }
        let si = match si {
            Ok(si) => si,
            Err(e) => return SandboxError::Io(e),
        };

        let message = read_all_from_memfd(self.supervisor_error_fd.as_raw_fd()).unwrap_or_default();
        if !message.is_empty() {
            return SandboxError::Protocol(message.trim_end().to_string());
        }
        if si.code != libc::CLD_KILLED || si.status != libc::SIGKILL {
            return SandboxError::SupervisorDied(si.description());
        }
        SandboxError::SupervisorDied("killed by supervisor cleanup".to_string())
    }

    fn kill_and_wait_supervisor_silently(&self) {
        unsafe {
            libc::syscall(
                libc::SYS_pidfd_send_signal,
                self.supervisor_pidfd.as_raw_fd(),
                libc::SIGKILL,
                std::ptr::null::<libc::siginfo_t>(),
                0,
            );
        }
        let _ = waitid_pidfd(self.supervisor_pidfd.as_raw_fd());
    }
}

impl Drop for SupervisorConnection {
    fn drop(&mut self) {
        let already_dead = matches!(*self.state.lock().unwrap(), ConnState::Dead);
        if already_dead {
            return;
        }
        // Mirrors the original's `uncaught_exceptions_in_constructor`
        // check: during unwinding we must not risk throwing again, so we
        // kill silently instead of surfacing accumulated errors.
        if std::thread::panicking() {
            self.kill_and_wait_supervisor_silently();
        } else {
            let _ = self.kill_and_wait_supervisor_and_receive_errors();
        }
    }
}

fn pipe_cloexec() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0i32; 2];
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

fn eventfd_cloexec() -> io::Result<OwnedFd> {
    let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn pidfd_send_signal(pidfd: RawFd, signal: i32) -> io::Result<()> {
    let rc = unsafe {
        libc::syscall(
            libc::SYS_pidfd_send_signal,
            pidfd,
            signal,
            std::ptr::null::<libc::siginfo_t>(),
            0,
        )
    };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn waitid_pidfd(pidfd: RawFd) -> io::Result<Si> {
    let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
    let rc = unsafe {
        libc::waitid(
            libc::P_PIDFD,
            pidfd as libc::id_t,
            &mut info,
            libc::WEXITED | libc::__WALL,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `si_status()` accesses the kernel-populated union arm, valid
    // for the WEXITED result a successful `waitid` just produced.
    let code = info.si_code;
    let status = unsafe { info.si_status() };
    Ok(Si { code, status })
}

fn read_all_from_memfd(fd: RawFd) -> io::Result<String> {
    let mut file = unsafe { std::fs::File::from_raw_fd(libc::dup(fd)) };
    use std::io::Seek;
    file.seek(std::io::SeekFrom::Start(0))?;
    let mut buf = String::new();
    file.read_to_string(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn read_eventfd(fd: RawFd) -> u64 {
        let mut value: u64 = 0;
        let n = unsafe { libc::read(fd, &mut value as *mut u64 as *mut _, 8) };
        assert_eq!(n, 8);
        value
    }

    #[test]
    fn cancel_closes_result_fd_and_is_idempotent() {
        let (result_read, result_write) = pipe_cloexec().unwrap();
        let kill_fd = eventfd_cloexec().unwrap();
        let mut handle = RequestHandle { result_fd: Some(result_read), kill_fd: Some(kill_fd), awaited: false };

        handle.cancel();
        handle.cancel(); // idempotent

        assert!(handle.result_fd.is_none());
        let rc = unsafe { libc::write(result_write.as_raw_fd(), b"x".as_ptr() as *const _, 1) };
        assert_eq!(rc, -1);
    }

    #[test]
    fn get_kill_handle_detaches_and_kill_is_idempotent() {
        let (result_read, _result_write) = pipe_cloexec().unwrap();
        let kill_fd = eventfd_cloexec().unwrap();
        let kill_fd_raw = kill_fd.as_raw_fd();
        let mut handle = RequestHandle { result_fd: Some(result_read), kill_fd: Some(kill_fd), awaited: false };

        let kill_handle = handle.get_kill_handle();
        assert!(handle.kill_fd.is_none());

        kill_handle.kill();
        assert_eq!(read_eventfd(kill_fd_raw), 1);

        // A second kill() is a documented no-op: the fd was already taken
        // and dropped by the first call, so nothing is written or panics.
        kill_handle.kill();
    }

    #[test]
    fn drop_without_await_cancels() {
        let (result_read, result_write) = pipe_cloexec().unwrap();
        let kill_fd = eventfd_cloexec().unwrap();
        {
            let _handle = RequestHandle { result_fd: Some(result_read), kill_fd: Some(kill_fd), awaited: false };
        }
        // result_read was dropped with the handle; the write end alone is
        // enough to prove the read end is gone by checking EPIPE on write.
        let rc = unsafe { libc::write(result_write.as_raw_fd(), b"x".as_ptr() as *const _, 1) };
        assert_eq!(rc, -1);
    }

    #[test]
    fn validate_modes_accepts_modes_in_range() {
        let ops = vec![
            MountOperation::CreateDir { path: PathBuf::from("/x"), mode: 0o777 },
            MountOperation::CreateFile { path: PathBuf::from("/y"), mode: 0 },
            MountOperation::MountTmpfs {
                path: PathBuf::from("/tmp"),
                max_total_size_of_files_in_bytes: None,
                inode_limit: None,
                root_dir_mode: 0o755,
                read_only: false,
                no_exec: false,
            },
        ];
        assert!(validate_modes(&ops).is_ok());
    }

    #[test]
    fn validate_modes_rejects_mode_above_0o777() {
        let ops = vec![MountOperation::CreateDir { path: PathBuf::from("/x"), mode: 0o1000 }];
        let err = validate_modes(&ops).unwrap_err();
        assert!(matches!(err, RequestError::InvalidMode(0o1000)));
    }
}
