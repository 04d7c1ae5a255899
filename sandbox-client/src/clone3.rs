//! Minimal `clone3(2)` wrapper. `nix` does not wrap `clone3`, so this drops
//! to a raw syscall the way `vinit::pidfd` does for `pidfd_open`
//! (`nix::libc::syscall(SYS_pidfd_open, ...)`).

use std::io;
use std::os::fd::{FromRawFd, OwnedFd};

#[repr(C)]
#[derive(Default)]
struct CloneArgs {
    flags: u64,
    pidfd: u64,
    child_tid: u64,
    parent_tid: u64,
    exit_signal: u64,
    stack: u64,
    stack_size: u64,
    tls: u64,
    set_tid: u64,
    set_tid_size: u64,
    cgroup: u64,
}

pub enum CloneResult {
    Parent { child_pid: i32, pidfd: OwnedFd },
    Child,
}

/// Spawns with `CLONE_PIDFD` and no namespace flags, used by
/// `spawn_supervisor`.
///
/// # Safety
/// The caller must treat the `Child` arm like the child side of `fork()`:
/// only async-signal-safe operations until `execveat` or `_exit`.
pub unsafe fn clone3_with_pidfd() -> io::Result<CloneResult> {
    let mut pidfd: i32 = -1;
    let args = CloneArgs {
        flags: libc::CLONE_PIDFD as u64,
        pidfd: &mut pidfd as *mut i32 as u64,
        exit_signal: 0,
        ..Default::default()
    };
    let ret = libc::syscall(
        libc::SYS_clone3,
        &args as *const CloneArgs,
        std::mem::size_of::<CloneArgs>(),
    );
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    if ret == 0 {
        Ok(CloneResult::Child)
    } else {
        Ok(CloneResult::Parent {
            child_pid: ret as i32,
            pidfd: OwnedFd::from_raw_fd(pidfd),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;

    /// Needs a real kernel clone3; skipped outside an environment where
    /// that's expected to work (e.g. a restrictive container sandbox).
    #[test]
    #[ignore]
    fn spawns_a_child_reapable_via_its_pidfd() {
        match unsafe { clone3_with_pidfd() }.unwrap() {
            CloneResult::Child => unsafe { libc::_exit(0) },
            CloneResult::Parent { pidfd, .. } => {
                let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
                let rc = unsafe {
                    libc::waitid(libc::P_PIDFD, pidfd.as_raw_fd() as libc::id_t, &mut info, libc::WEXITED)
                };
                assert_eq!(rc, 0);
                assert_eq!(info.si_code, libc::CLD_EXITED);
            }
        }
    }
}
