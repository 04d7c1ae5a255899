//! Tracee stub (C7): the untrusted program's immediate parent-less
//! self, running inside the fully-constructed namespaces/cgroup, moments
//! from `execveat`. Grounded on `tracee.cc`'s `tracee::main`.

use std::ffi::CString;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::time::Duration;

use sandbox_proto::{shm::Pid1SharedState, shm::TraceeSharedState};

use crate::cgroup::CgroupLeaf;
use crate::error::{ErrnoExt, PhaseError, PhaseResult};
use crate::fd::close_fds_except;
use crate::seccomp;

pub struct TraceeArgs {
    pub executable_fd: OwnedFd,
    pub stdin_fd: Option<OwnedFd>,
    pub stdout_fd: Option<OwnedFd>,
    pub stderr_fd: Option<OwnedFd>,
    pub seccomp_bpf_fd: Option<OwnedFd>,
    pub argv: Vec<CString>,
    pub env: Vec<CString>,
    pub own_cgroup: CgroupLeaf,
    pub pid1_state: Pid1SharedState,
    pub tracee_state: TraceeSharedState,
}

fn dup3_onto(fd: RawFd, target: RawFd) -> PhaseResult<()> {
    unsafe { libc::dup3(fd, target, 0) }.or_errno("dup3()")?;
    Ok(())
}

fn monotonic_raw_now() -> PhaseResult<Duration> {
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    if unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC_RAW, &mut ts) } != 0 {
        return Err(PhaseError::errno("clock_gettime()"));
    }
    Ok(Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32))
}

fn run_fallible(args: &TraceeArgs) -> PhaseResult<()> {
    if let Some(fd) = &args.stdin_fd {
        dup3_onto(fd.as_raw_fd(), libc::STDIN_FILENO)?;
    }
    if let Some(fd) = &args.stdout_fd {
        dup3_onto(fd.as_raw_fd(), libc::STDOUT_FILENO)?;
    }
    if let Some(fd) = &args.stderr_fd {
        dup3_onto(fd.as_raw_fd(), libc::STDERR_FILENO)?;
    }

    if args.argv.is_empty() {
        return Err(PhaseError::msg("execveat()", "argv must contain at least argv[0]"));
    }

    seccomp::set_no_new_privs()?;
    if let Some(bpf_fd) = &args.seccomp_bpf_fd {
        seccomp::install(bpf_fd.as_raw_fd())?;
    }

    let (user_usec, system_usec) = args
        .own_cgroup
        .cpu_usec()
        .map_err(|e| PhaseError::new("cpu.stat", e))?;
    args.pid1_state
        .set_tracee_exec_start_cpu_time(Some(user_usec), Some(system_usec));
    args.pid1_state.set_tracee_exec_start_time(Some(monotonic_raw_now()?));

    // The SCM_RIGHTS receive path never sets CLOEXEC, so every fd this
    // process has inherited (including ones belonging to other in-flight
    // requests) is still open here; only argv[0]'s own fd may legitimately
    // reach execveat.
    close_fds_except(&[libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO, args.executable_fd.as_raw_fd()])
        .map_err(|e| PhaseError::new("close unneeded FDs", e))?;

    let mut argv_ptrs: Vec<*const libc::c_char> = args.argv.iter().map(|s| s.as_ptr()).collect();
    argv_ptrs.push(std::ptr::null());
    let mut env_ptrs: Vec<*const libc::c_char> = args.env.iter().map(|s| s.as_ptr()).collect();
    env_ptrs.push(std::ptr::null());
    let empty = CString::new("").unwrap();

    unsafe {
        libc::syscall(
            libc::SYS_execveat,
            args.executable_fd.as_raw_fd(),
            empty.as_ptr(),
            argv_ptrs.as_ptr(),
            env_ptrs.as_ptr(),
            libc::AT_EMPTY_PATH,
        );
    }
    Err(PhaseError::errno("execveat()"))
}

/// Never returns: always `_exit`s, as the only two observable outcomes of
/// this process are "it execve'd into the tracee program" (at which point
/// this code no longer exists) or "it recorded an error and exited 1".
pub fn run(args: TraceeArgs) -> ! {
    if let Err(e) = run_fallible(&args) {
        args.tracee_state.write_error(&format!("tracee: {e}"));
    }
    unsafe { libc::_exit(1) };
}
