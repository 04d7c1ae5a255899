//! pid1 initializer (C6): runs inside the freshly created
//! namespaces as the init-like process. Grounded on `pid1.cc`'s `main`
//! phase order: session detach, user-ns mapping, signal neutralization,
//! mount setup, pivot_root, prlimit, tracee spawn, reap loop, report.

use std::ffi::CString;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::PathBuf;
use std::time::Duration;

use sandbox_proto::shm::{Pid1SharedState, TraceeSharedState};
use sandbox_proto::{MountNamespace, Prlimit, Si, UserNamespace};

use crate::cgroup::CgroupLeaf;
use crate::clone3::{clone3, CloneResult};
use crate::error::{ErrnoExt, PhaseError, PhaseResult};
use crate::fd::close_fds_except;
use crate::tracee::{self, TraceeArgs};
use crate::{mounts, ns, prlimit as prlimit_mod};

pub struct Pid1Args {
    pub user_ns: UserNamespace,
    pub mount_ns: MountNamespace,
    pub prlimit: Prlimit,
    pub executable_fd: OwnedFd,
    pub stdin_fd: Option<OwnedFd>,
    pub stdout_fd: Option<OwnedFd>,
    pub stderr_fd: Option<OwnedFd>,
    pub seccomp_bpf_fd: Option<OwnedFd>,
    pub argv: Vec<CString>,
    pub env: Vec<CString>,
    pub tracee_cgroup: CgroupLeaf,
    pub pid1_state: Pid1SharedState,
    pub tracee_state: TraceeSharedState,
}

fn monotonic_raw_now() -> PhaseResult<Duration> {
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    if unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC_RAW, &mut ts) } != 0 {
        return Err(PhaseError::errno("clock_gettime()"));
    }
    Ok(Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32))
}

fn ignore_signal(sig: libc::c_int) -> PhaseResult<()> {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = libc::SIG_IGN;
        libc::sigemptyset(&mut sa.sa_mask).or_errno("sigemptyset()")?;
        libc::sigaction(sig, &sa, std::ptr::null_mut()).or_errno("sigaction()")?;
    }
    Ok(())
}

/// Installed only when built with `--features ubsan`, mirroring the
/// original's `UNDEFINED_SANITIZER` compile-time constant: a sanitizer
/// build's own signal handlers can otherwise self-kill pid1 on the first
/// instrumented check in its exit path.
#[cfg(feature = "ubsan")]
fn neutralize_sanitizer_signals() -> PhaseResult<()> {
    ignore_signal(libc::SIGBUS)?;
    ignore_signal(libc::SIGFPE)?;
    ignore_signal(libc::SIGSEGV)
}

#[cfg(not(feature = "ubsan"))]
fn neutralize_sanitizer_signals() -> PhaseResult<()> {
    Ok(())
}

fn spawn_tracee(
    executable_fd: OwnedFd,
    stdin_fd: Option<OwnedFd>,
    stdout_fd: Option<OwnedFd>,
    stderr_fd: Option<OwnedFd>,
    seccomp_bpf_fd: Option<OwnedFd>,
    argv: Vec<CString>,
    env: Vec<CString>,
    tracee_cgroup: CgroupLeaf,
    pid1_state: Pid1SharedState,
    tracee_state: TraceeSharedState,
) -> PhaseResult<i32> {
    let cgroup_fd = tracee_cgroup
        .open_dir_fd()
        .map_err(|e| PhaseError::new("open(cgroup dir)", e))?;

    // SAFETY: the child performs only the async-signal-safe work in
    // `tracee::run` before `execveat`/`_exit`.
    match unsafe { clone3(0, libc::SIGCHLD, Some(cgroup_fd.as_raw_fd()), false) }
        .map_err(|e| PhaseError::new("clone3()", e))?
    {
        CloneResult::Child => {
            let tracee_args = TraceeArgs {
                executable_fd,
                stdin_fd,
                stdout_fd,
                stderr_fd,
                seccomp_bpf_fd,
                argv,
                env,
                own_cgroup: tracee_cgroup,
                pid1_state,
                tracee_state,
            };
            tracee::run(tracee_args);
        }
        CloneResult::Parent { child_pid, .. } => Ok(child_pid),
    }
}

/// Reaps every child until `ECHILD`; the one reap matching `tracee_pid`
/// records `waitid_time` and carries the `Si` that is ultimately reported
///. Every PID-namespace descendant still alive once
/// pid1 itself exits is torn down by the kernel.
fn reap_loop(pid1_state: &Pid1SharedState, tracee_pid: i32) -> PhaseResult<Si> {
    loop {
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::waitid(libc::P_ALL, 0, &mut info, libc::WEXITED | libc::__WALL) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ECHILD) {
                return Err(PhaseError::msg("waitid()", "tracee pid was never reaped"));
            }
            return Err(PhaseError::new("waitid()", err));
        }
        if info.si_pid == tracee_pid {
            let now = monotonic_raw_now()?;
            pid1_state.set_tracee_waitid_time(Some(now));
            let code = info.si_code;
            let status = unsafe { info.si_status() };
            return Ok(Si { code, status });
        }
    }
}

/// Distinguishes "the tracee already reported its own error on its own
/// page" (pid1 just exits 1 without writing anything) from a clean run.
/// A phase failure takes the `Err` path instead and is
/// reported as `"pid1: <op> - <errno string>"` by the caller.
enum RunResult {
    Ok,
    TraceeAlreadyReported,
}

fn run_phases(args: Pid1Args) -> PhaseResult<RunResult> {
    unsafe { libc::setsid() }.or_errno("setsid()")?;
    ns::setup(&args.user_ns)?;
    neutralize_sanitizer_signals()?;
    mounts::apply_all(&args.mount_ns.operations)?;
    if let Some(new_root) = &args.mount_ns.new_root_mount_path {
        mounts::pivot_root(&PathBuf::from(new_root))?;
    }
    prlimit_mod::apply(&args.prlimit)?;

    let pid1_state = args.pid1_state;
    let tracee_state = args.tracee_state;
    let tracee_pid = spawn_tracee(
        args.executable_fd,
        args.stdin_fd,
        args.stdout_fd,
        args.stderr_fd,
        args.seccomp_bpf_fd,
        args.argv,
        args.env,
        args.tracee_cgroup,
        pid1_state,
        tracee_state,
    )?;

    // pid1 needs no FDs past this point; the shared-memory pages it reports
    // through are independent mappings, not descriptors.
    close_fds_except(&[]).map_err(|e| PhaseError::new("close unneeded FDs", e))?;

    // If the tracee already reported an error, the supervisor will find it
    // on the tracee page; pid1 just needs to exit 1 without also writing an
    // `Ok` result.
    let si = reap_loop(&pid1_state, tracee_pid)?;
    if tracee_state.read_error().is_some() {
        return Ok(RunResult::TraceeAlreadyReported);
    }
    pid1_state.write_result_ok(si);
    Ok(RunResult::Ok)
}

/// Never returns. Reports through the pid1 shared page and `_exit`s with the
/// status the supervisor expects.
pub fn run(args: Pid1Args) -> ! {
    let pid1_state = args.pid1_state;
    let exit_code = match run_phases(args) {
        Ok(RunResult::Ok) => 0,
        Ok(RunResult::TraceeAlreadyReported) => 1,
        Err(e) => {
            pid1_state.write_result_error(&format!("pid1: {e}"));
            1
        }
    };
    unsafe { libc::_exit(exit_code) };
}
