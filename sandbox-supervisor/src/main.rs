//! Supervisor entry point (C5): one process per client
//! connection, serving requests off a single unix socket handed to it as
//! argv[1]. Grounded on `vinit/src/bin/simplevisor.rs`'s shape for a small,
//! synchronous reactor binary (`fn main`, a reap loop, plain `eprintln!`
//! diagnostics on fatal setup failure) and on `gruel::signals::mio`'s
//! register/poll/dispatch pattern for the per-request wait loop, generalized
//! from "one fixed set of signal sources" to "one pidfd/kill-eventfd/timerfd
//! set per in-flight request".

mod cgroup;
mod clone3;
mod error;
mod fd;
mod mounts;
mod ns;
mod pid1;
mod prlimit;
mod seccomp;
mod tracee;

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

use sandbox_proto::shm::{Pid1SharedState, TraceeSharedState, PAGE_SIZE};
use sandbox_proto::wire::{self, fds_mask, DecodedRequest};
use sandbox_proto::{CgroupAccounting, Outcome, Si};

use cgroup::CgroupLeaf;
use clone3::CloneResult;
use pid1::Pid1Args;

/// Not yet exposed by the `libc` crate at this version; present since Linux
/// 5.6 as `include/uapi/linux/sched.h`'s `CLONE_NEWTIME`.
const CLONE_NEWTIME: u64 = 0x0000_0080;

const PID1_CLONE_FLAGS: u64 = (libc::CLONE_NEWUSER
    | libc::CLONE_NEWNS
    | libc::CLONE_NEWPID
    | libc::CLONE_NEWNET
    | libc::CLONE_NEWIPC
    | libc::CLONE_NEWUTS) as u64
    | CLONE_NEWTIME;

const TOKEN_PIDFD: Token = Token(0);
const TOKEN_KILL: Token = Token(1);
const TOKEN_RESULT: Token = Token(2);
const TOKEN_TIME_LIMIT: Token = Token(3);
const TOKEN_CPU_POLL: Token = Token(4);

const CPU_POLL_INTERVAL: Duration = Duration::from_millis(50);

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(message) = run() {
        eprintln!("supervisor: {message}");
        unsafe { libc::_exit(1) };
    }
}

fn run() -> Result<(), String> {
    let sock_fd = parse_args()?;
    validate_socket(sock_fd).map_err(|e| format!("Usage: supervisor <socket_fd> ({e})"))?;

    let delegated = discover_own_cgroup().map_err(|e| format!("cgroup discovery - {e}"))?;
    // The client's bootstrap already enabled these controllers before
    // exec'ing us; this is a defensive no-op in the common path and only
    // does real work on the `systemd-run` fallback.
    let _ = cgroup::enable_controllers(&delegated);

    tracing::info!(cgroup = %delegated.display(), "supervisor ready");

    loop {
        match serve_one(sock_fd, &delegated) {
            Ok(true) => continue,
            Ok(false) => {
                tracing::info!("client disconnected, exiting");
                return Ok(());
            }
            Err(e) => return Err(format!("{e}")),
        }
    }
}

fn parse_args() -> Result<RawFd, String> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        return Err("Usage: supervisor <socket_fd>".to_string());
    }
    args[1]
        .parse::<RawFd>()
        .map_err(|_| "Usage: supervisor <socket_fd>".to_string())
}

fn validate_socket(fd: RawFd) -> io::Result<()> {
    let mut domain: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_DOMAIN,
            &mut domain as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    if domain != libc::AF_UNIX {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "fd is not AF_UNIX"));
    }

    let mut sock_type: libc::c_int = 0;
    len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_TYPE,
            &mut sock_type as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    if sock_type != libc::SOCK_STREAM {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "fd is not SOCK_STREAM"));
    }
    Ok(())
}

/// Mirrors `sandbox-client::bootstrap::enter_delegated_cgroup`: by the
/// time this binary's `main` runs, the client's forked bootstrap child has
/// already moved itself (and therefore us, post-exec) into the delegated
/// subtree. We just need to know where it put us.
fn discover_own_cgroup() -> io::Result<PathBuf> {
    let ours = std::fs::read_to_string("/proc/self/cgroup")?;
    let path = ours
        .lines()
        .find_map(|line| line.strip_prefix("0::"))
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no unified cgroup entry"))?;
    Ok(Path::new("/sys/fs/cgroup").join(path.trim_start_matches('/')))
}

/// Reads one request off the socket and serves it to completion. Returns
/// `Ok(false)` on a clean EOF, `Ok(true)` otherwise, and
/// `Err` only for a framing-level failure that leaves the connection
/// unrecoverable (a short header/body read, too few ancillary FDs to even
/// report an error back).
fn serve_one(sock_fd: RawFd, delegated: &Path) -> io::Result<bool> {
    let mut header = [0u8; 8];
    let Some(mut fds) = fd::recv_header_with_fds(sock_fd, &mut header, 7)? else {
        return Ok(false);
    };

    let body_len = wire::decode_header(header);
    let mut body = vec![0u8; body_len as usize];
    fd::recv_exact(sock_fd, &mut body)?;

    if fds.len() < 2 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "too few ancillary FDs for a request"));
    }
    let kill_fd = fds.pop().unwrap();
    let result_fd = fds.pop().unwrap();

    let outcome = match wire::decode_request(&body) {
        Ok(decoded) => match validate_fd_count(decoded.fds_mask, fds.len()) {
            Ok(()) => run_request(decoded, fds, &kill_fd, &result_fd, delegated)
                .unwrap_or_else(|e| Outcome::Error { description: e }),
            Err(e) => Outcome::Error { description: format!("sandbox: {e}") },
        },
        Err(e) => Outcome::Error { description: format!("sandbox: {e}") },
    };

    if let Err(e) = write_response(result_fd.as_raw_fd(), &outcome) {
        // The client may have already cancelled and closed its read end;
        // that is not this connection's problem to solve.
        tracing::debug!("write response - {e}");
    }
    drop(result_fd);
    drop(kill_fd);
    Ok(true)
}

fn validate_fd_count(mask: u8, available: usize) -> Result<(), String> {
    let expected = 1 + mask.count_ones() as usize;
    if available != expected {
        return Err(format!("expected {expected} FDs for fds.mask {mask:#04x}, got {available}"));
    }
    Ok(())
}

fn write_response(fd: RawFd, outcome: &Outcome) -> io::Result<()> {
    let body = wire::encode_response(outcome);
    fd::send_exact(fd, &body)
}

fn open_dev_null(flags: libc::c_int) -> io::Result<OwnedFd> {
    let path = CString::new("/dev/null").unwrap();
    let raw = unsafe { libc::open(path.as_ptr(), flags) };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}

/// Runs one fully-decoded request end to end: cgroup leaves, shared pages,
/// `clone3`, the wait loop, outcome composition, and teardown.
fn run_request(
    decoded: DecodedRequest,
    fds: Vec<OwnedFd>,
    kill_fd: &OwnedFd,
    result_fd: &OwnedFd,
    delegated: &Path,
) -> Result<Outcome, String> {
    let mut it = fds.into_iter();
    let executable_fd = it.next().ok_or_else(|| "sandbox: missing executable FD".to_string())?;
    let stdin_provided = if decoded.fds_mask & fds_mask::STDIN != 0 { it.next() } else { None };
    let stdout_provided = if decoded.fds_mask & fds_mask::STDOUT != 0 { it.next() } else { None };
    let stderr_provided = if decoded.fds_mask & fds_mask::STDERR != 0 { it.next() } else { None };
    let seccomp_bpf_fd = if decoded.fds_mask & fds_mask::SECCOMP_BPF != 0 { it.next() } else { None };

    // Non-provided streams stay pointing at /dev/null,
    // opened here rather than left to whatever fd 0/1/2 happen to be.
    let stdin_fd = Some(match stdin_provided {
        Some(fd) => fd,
        None => open_dev_null(libc::O_RDONLY).map_err(|e| format!("supervisor: open(/dev/null) - {e}"))?,
    });
    let stdout_fd = Some(match stdout_provided {
        Some(fd) => fd,
        None => open_dev_null(libc::O_WRONLY).map_err(|e| format!("supervisor: open(/dev/null) - {e}"))?,
    });
    let stderr_fd = Some(match stderr_provided {
        Some(fd) => fd,
        None => open_dev_null(libc::O_WRONLY).map_err(|e| format!("supervisor: open(/dev/null) - {e}"))?,
    });

    // The decoder only ever hands back strings that stopped at their own
    // NUL terminator, so these can never contain an embedded NUL.
    let argv: Vec<CString> = decoded
        .argv
        .into_iter()
        .map(|b| CString::new(b).expect("decoder guarantees no embedded NUL"))
        .collect();
    let env: Vec<CString> = decoded
        .options
        .env
        .into_iter()
        .map(|b| CString::new(b).expect("decoder guarantees no embedded NUL"))
        .collect();

    let pid1_leaf = CgroupLeaf::create(delegated).map_err(|e| format!("supervisor: create(pid1 cgroup) - {e}"))?;
    let tracee_leaf = CgroupLeaf::create(delegated).map_err(|e| format!("supervisor: create(tracee cgroup) - {e}"))?;
    tracee_leaf
        .apply_limits(&decoded.options.cgroup)
        .map_err(|e| format!("supervisor: apply cgroup limits - {e}"))?;

    let outcome = spawn_and_supervise(
        decoded.options.linux_namespaces.user,
        decoded.options.linux_namespaces.mount,
        decoded.options.prlimit,
        executable_fd,
        stdin_fd,
        stdout_fd,
        stderr_fd,
        seccomp_bpf_fd,
        argv,
        env,
        &pid1_leaf,
        &tracee_leaf,
        kill_fd,
        result_fd,
        decoded.options.time_limit,
        decoded.options.cpu_time_limit,
    );

    if let Err(e) = tracee_leaf.teardown() {
        tracing::warn!("teardown(tracee cgroup) - {e}");
    }
    if let Err(e) = pid1_leaf.teardown() {
        tracing::warn!("teardown(pid1 cgroup) - {e}");
    }

    outcome
}

fn map_page() -> io::Result<*mut u8> {
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            PAGE_SIZE,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    Ok(ptr as *mut u8)
}

#[allow(clippy::too_many_arguments)]
fn spawn_and_supervise(
    user_ns: sandbox_proto::UserNamespace,
    mount_ns: sandbox_proto::MountNamespace,
    prlimit: sandbox_proto::Prlimit,
    executable_fd: OwnedFd,
    stdin_fd: Option<OwnedFd>,
    stdout_fd: Option<OwnedFd>,
    stderr_fd: Option<OwnedFd>,
    seccomp_bpf_fd: Option<OwnedFd>,
    argv: Vec<CString>,
    env: Vec<CString>,
    pid1_leaf: &CgroupLeaf,
    tracee_leaf: &CgroupLeaf,
    kill_fd: &OwnedFd,
    result_fd: &OwnedFd,
    time_limit: Option<Duration>,
    cpu_time_limit: Option<Duration>,
) -> Result<Outcome, String> {
    let pid1_page = map_page().map_err(|e| format!("supervisor: mmap(pid1 page) - {e}"))?;
    let tracee_page = map_page().map_err(|e| format!("supervisor: mmap(tracee page) - {e}"))?;
    let _pages_guard = scopeguard::guard((), |_| unsafe {
        libc::munmap(pid1_page as *mut libc::c_void, PAGE_SIZE);
        libc::munmap(tracee_page as *mut libc::c_void, PAGE_SIZE);
    });

    // SAFETY: both mappings are page-sized, page-aligned, MAP_SHARED
    // anonymous pages that outlive this function via `_pages_guard`.
    let pid1_state = unsafe { Pid1SharedState::from_raw(pid1_page) };
    let tracee_state = unsafe { TraceeSharedState::from_raw(tracee_page) };
    pid1_state.reset();
    tracee_state.reset();

    let pid1_cgroup_fd = pid1_leaf
        .open_dir_fd()
        .map_err(|e| format!("supervisor: open(pid1 cgroup dir) - {e}"))?;

    let pid1_args = Pid1Args {
        user_ns,
        mount_ns,
        prlimit,
        executable_fd,
        stdin_fd,
        stdout_fd,
        stderr_fd,
        seccomp_bpf_fd,
        argv,
        env,
        tracee_cgroup: tracee_leaf.clone(),
        pid1_state,
        tracee_state,
    };

    let (child_pid, pidfd) =
        clone_pid1(pid1_args, pid1_cgroup_fd.as_raw_fd()).map_err(|e| format!("supervisor: clone3() - {e}"))?;
    // `pid1_args` was consumed by `clone_pid1`; in the parent this simply
    // drops there, closing the supervisor's copies of every client FD now
    // that pid1 owns them.
    drop(pid1_cgroup_fd);

    tracing::debug!(pid1 = child_pid, "spawned pid1");

    let (forced_kill, observed_at) =
        poll_until_exit(&pidfd, pid1_leaf, tracee_leaf, kill_fd, result_fd, time_limit, cpu_time_limit)?;

    let pid1_exit_si = waitid_pidfd(pidfd.as_raw_fd()).map_err(|e| format!("supervisor: waitid() - {e}"))?;

    Ok(compose_outcome(
        &pid1_state,
        &tracee_state,
        tracee_leaf,
        pid1_exit_si,
        forced_kill,
        observed_at,
    ))
}

fn clone_pid1(pid1_args: Pid1Args, cgroup_fd: RawFd) -> io::Result<(i32, OwnedFd)> {
    // SAFETY: the child performs only the phase sequence in `pid1::run`
    // before `_exit`.
    match unsafe { clone3::clone3(PID1_CLONE_FLAGS, libc::SIGCHLD, Some(cgroup_fd), true)? } {
        CloneResult::Child => pid1::run(pid1_args),
        CloneResult::Parent { child_pid, pidfd } => Ok((child_pid, pidfd.expect("requested a pidfd"))),
    }
}

fn waitid_pidfd(pidfd: RawFd) -> io::Result<Si> {
    let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::waitid(libc::P_PIDFD, pidfd as libc::id_t, &mut info, libc::WEXITED | libc::__WALL) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    let code = info.si_code;
    let status = unsafe { info.si_status() };
    Ok(Si { code, status })
}

fn kill_both_leaves(pid1_leaf: &CgroupLeaf, tracee_leaf: &CgroupLeaf) {
    let _ = tracee_leaf.kill();
    let _ = pid1_leaf.kill();
}

fn drain_u64(fd: RawFd) {
    let mut buf = [0u8; 8];
    unsafe {
        libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, 8);
    }
}

fn duration_to_timespec(d: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: d.as_secs() as libc::time_t,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    }
}

fn create_timerfd() -> io::Result<OwnedFd> {
    let fd = unsafe { libc::timerfd_create(libc::CLOCK_MONOTONIC, libc::TFD_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn arm_timerfd(fd: RawFd, initial: Duration, interval: Option<Duration>) -> io::Result<()> {
    let spec = libc::itimerspec {
        it_interval: interval.map(duration_to_timespec).unwrap_or(libc::timespec { tv_sec: 0, tv_nsec: 0 }),
        it_value: duration_to_timespec(initial),
    };
    let rc = unsafe { libc::timerfd_settime(fd, 0, &spec, std::ptr::null_mut()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn monotonic_raw_now() -> io::Result<Duration> {
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    if unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC_RAW, &mut ts) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32))
}

/// Waits for pid1 to exit, watching three other sources alongside its pidfd:
/// the client's kill eventfd, the result pipe
/// (closing its read end is how a plain `cancel()` is observed), and
/// optional wall-time/cpu-time timerfds. Returns whether a forced kill was
/// issued and the monotonic time at which pid1's pidfd became readable, used
/// as a "waitid time" stand-in when pid1 dies before writing one itself.
fn poll_until_exit(
    pidfd: &OwnedFd,
    pid1_leaf: &CgroupLeaf,
    tracee_leaf: &CgroupLeaf,
    kill_fd: &OwnedFd,
    result_fd: &OwnedFd,
    time_limit: Option<Duration>,
    cpu_time_limit: Option<Duration>,
) -> Result<(bool, Duration), String> {
    let mut poll = Poll::new().map_err(|e| format!("epoll_create() - {e}"))?;
    let registry = poll.registry();

    let pidfd_raw = pidfd.as_raw_fd();
    registry
        .register(&mut SourceFd(&pidfd_raw), TOKEN_PIDFD, Interest::READABLE)
        .map_err(|e| format!("epoll_ctl(pidfd) - {e}"))?;

    let kill_raw = kill_fd.as_raw_fd();
    registry
        .register(&mut SourceFd(&kill_raw), TOKEN_KILL, Interest::READABLE)
        .map_err(|e| format!("epoll_ctl(kill_fd) - {e}"))?;

    let result_raw = result_fd.as_raw_fd();
    registry
        .register(&mut SourceFd(&result_raw), TOKEN_RESULT, Interest::WRITABLE)
        .map_err(|e| format!("epoll_ctl(result_fd) - {e}"))?;

    let time_limit_fd = time_limit
        .map(|d| -> io::Result<OwnedFd> {
            let fd = create_timerfd()?;
            arm_timerfd(fd.as_raw_fd(), d, None)?;
            Ok(fd)
        })
        .transpose()
        .map_err(|e| format!("timerfd_create(time_limit) - {e}"))?;
    if let Some(fd) = &time_limit_fd {
        let raw = fd.as_raw_fd();
        registry
            .register(&mut SourceFd(&raw), TOKEN_TIME_LIMIT, Interest::READABLE)
            .map_err(|e| format!("epoll_ctl(time_limit) - {e}"))?;
    }

    let cpu_poll_fd = cpu_time_limit
        .map(|_| -> io::Result<OwnedFd> {
            let fd = create_timerfd()?;
            arm_timerfd(fd.as_raw_fd(), CPU_POLL_INTERVAL, Some(CPU_POLL_INTERVAL))?;
            Ok(fd)
        })
        .transpose()
        .map_err(|e| format!("timerfd_create(cpu_time_limit) - {e}"))?;
    if let Some(fd) = &cpu_poll_fd {
        let raw = fd.as_raw_fd();
        registry
            .register(&mut SourceFd(&raw), TOKEN_CPU_POLL, Interest::READABLE)
            .map_err(|e| format!("epoll_ctl(cpu_poll) - {e}"))?;
    }

    let mut events = Events::with_capacity(8);
    let mut forced_kill = false;
    loop {
        poll.poll(&mut events, None).map_err(|e| format!("epoll_wait() - {e}"))?;

        let mut exited = false;
        for event in events.iter() {
            match event.token() {
                TOKEN_PIDFD => exited = true,
                TOKEN_KILL => {
                    drain_u64(kill_raw);
                    kill_both_leaves(pid1_leaf, tracee_leaf);
                    forced_kill = true;
                }
                TOKEN_RESULT => {
                    if event.is_write_closed() || event.is_error() {
                        kill_both_leaves(pid1_leaf, tracee_leaf);
                        forced_kill = true;
                    }
                }
                TOKEN_TIME_LIMIT => {
                    if let Some(fd) = &time_limit_fd {
                        drain_u64(fd.as_raw_fd());
                    }
                    kill_both_leaves(pid1_leaf, tracee_leaf);
                    forced_kill = true;
                }
                TOKEN_CPU_POLL => {
                    if let Some(fd) = &cpu_poll_fd {
                        drain_u64(fd.as_raw_fd());
                    }
                    if let (Some(limit), Ok((user, system))) = (cpu_time_limit, tracee_leaf.cpu_usec()) {
                        if Duration::from_micros(user + system) >= limit {
                            kill_both_leaves(pid1_leaf, tracee_leaf);
                            forced_kill = true;
                        }
                    }
                }
                _ => {}
            }
        }

        if exited {
            let observed_at = monotonic_raw_now().map_err(|e| format!("clock_gettime() - {e}"))?;
            return Ok((forced_kill, observed_at));
        }
    }
}

/// Assembles the final `Outcome` from the two shared pages plus whatever the
/// supervisor itself observed, in priority order:
/// a self-reported tracee error wins, then a self-reported pid1 error, then
/// pid1's own `Ok` report (re-cast as an error if the tracee never reached
/// `execveat`), then — only if pid1 never wrote anything at all — either the
/// forced-kill `Ok` the supervisor manufactures itself or a bare "pid1 died
/// unexpectedly" error.
fn compose_outcome(
    pid1_state: &Pid1SharedState,
    tracee_state: &TraceeSharedState,
    tracee_leaf: &CgroupLeaf,
    pid1_exit_si: Si,
    forced_kill: bool,
    observed_at: Duration,
) -> Outcome {
    if let Some(description) = tracee_state.read_error() {
        return Outcome::Error { description };
    }

    let (baseline_user, baseline_system) = pid1_state.tracee_exec_start_cpu_time();
    let cgroup = tracee_leaf
        .accounting_since(baseline_user.unwrap_or(0), baseline_system.unwrap_or(0))
        .unwrap_or(CgroupAccounting {
            cpu_time_user: Duration::ZERO,
            cpu_time_system: Duration::ZERO,
            peak_memory_in_bytes: 0,
        });

    match pid1_state.read_result() {
        Some(Err(description)) => Outcome::Error { description },
        Some(Ok(si)) => match pid1_state.tracee_exec_start_time() {
            None => Outcome::Error {
                description: format!(
                    "tracee process died unexpectedly before execveat() without an error message: {}",
                    si.description()
                ),
            },
            Some(start) => {
                let runtime = pid1_state
                    .tracee_waitid_time()
                    .map(|end| end.saturating_sub(start))
                    .unwrap_or(Duration::ZERO);
                Outcome::Ok { si, runtime, cgroup }
            }
        },
        // pid1 never wrote a result at all. If the supervisor itself killed
        // the request tree (cancellation or a timeout), that is the expected
        // shape of this outcome, not a crash.
        None if forced_kill => {
            let runtime = pid1_state
                .tracee_exec_start_time()
                .map(|start| observed_at.saturating_sub(start))
                .unwrap_or(Duration::ZERO);
            Outcome::Ok {
                si: Si { code: libc::CLD_KILLED, status: libc::SIGKILL },
                runtime,
                cgroup,
            }
        }
        None => Outcome::Error {
            description: format!(
                "pid1 process died unexpectedly without an error message: {}",
                pid1_exit_si.description()
            ),
        },
    }
}
