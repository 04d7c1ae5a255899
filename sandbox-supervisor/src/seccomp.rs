//! Seccomp-BPF filter installation. The filter program
//! arrives as an already-open fd containing a flat array of `sock_filter`
//! (8-byte) instructions; size it, validate it, `mmap` it, then
//! `seccomp(SECCOMP_SET_MODE_FILTER, ...)`. `nix` does not wrap `seccomp(2)`;
//! this drops to `libc::syscall` the same way `clone3`/`execveat` do.

use std::os::fd::RawFd;

use crate::error::{ErrnoExt, PhaseError, PhaseResult};

const SOCK_FILTER_SIZE: i64 = 8;
const MAX_FILTER_BYTES: i64 = 1 << 19;

/// Sets `PR_SET_NO_NEW_PRIVS`.
pub fn set_no_new_privs() -> PhaseResult<()> {
    unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) }.or_errno("prctl(PR_SET_NO_NEW_PRIVS)")?;
    Ok(())
}

pub fn install(bpf_fd: RawFd) -> PhaseResult<()> {
    let size = unsafe { libc::lseek64(bpf_fd, 0, libc::SEEK_END) }.or_errno("lseek64()")?;
    if size == 0 || size % SOCK_FILTER_SIZE != 0 || size > MAX_FILTER_BYTES {
        return Err(PhaseError::msg(
            "seccomp filter",
            &format!("invalid filter size {size} bytes"),
        ));
    }

    let map = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size as usize,
            libc::PROT_READ,
            libc::MAP_PRIVATE,
            bpf_fd,
            0,
        )
    };
    if map == libc::MAP_FAILED {
        return Err(PhaseError::errno("mmap()"));
    }

    let prog = libc::sock_fprog {
        len: (size / SOCK_FILTER_SIZE) as u16,
        filter: map as *mut libc::sock_filter,
    };
    let rc = unsafe {
        libc::syscall(
            libc::SYS_seccomp,
            libc::SECCOMP_SET_MODE_FILTER,
            0u32,
            &prog as *const libc::sock_fprog,
        )
    };
    let result = rc.or_errno("seccomp()").map(|_| ());
    unsafe {
        libc::munmap(map, size as usize);
    }
    result
}
