//! Supervisor-side socket helpers: exact-size recv loop and `SCM_RIGHTS`
//! ancillary FD reception, paired with `sandbox-client`'s send side.
//! Grounded on the same raw read/write retry-loop style as
//! `vinit::pidfd`'s syscall wrappers, adapted here to detect a clean EOF at
//! message start rather than erroring.

use std::io;
use std::os::fd::{BorrowedFd, FromRawFd, OwnedFd, RawFd};

use nix::sys::socket::{recvmsg, ControlMessageOwned, MsgFlags};
use std::io::IoSliceMut;

/// Closes every open fd except those listed in `keep`. `clone3` without an
/// intervening `exec` copies the whole fd table, so every fd open in the
/// caller at clone time — including ones unrelated to the current request —
/// would otherwise survive into the child ("closes all inherited client FDs
/// that the tracee does not need" / "Close unneeded FDs"). Scans
/// `/proc/self/fd` and closes in a second pass so the directory iteration
/// itself isn't disturbed by fds closing mid-scan.
pub fn close_fds_except(keep: &[RawFd]) -> io::Result<()> {
    let mut victims = Vec::new();
    for entry in std::fs::read_dir("/proc/self/fd")? {
        let entry = entry?;
        let fd: RawFd = match entry.file_name().to_str().and_then(|s| s.parse().ok()) {
            Some(fd) => fd,
            None => continue,
        };
        if !keep.contains(&fd) {
            victims.push(fd);
        }
    }
    for fd in victims {
        unsafe {
            libc::close(fd);
        }
    }
    Ok(())
}

pub fn send_exact(fd: RawFd, buf: &[u8]) -> io::Result<()> {
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    let mut sent = 0;
    while sent < buf.len() {
        let n = nix::unistd::write(borrowed, &buf[sent..]).map_err(io::Error::from)?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
        }
        sent += n;
    }
    Ok(())
}

pub fn recv_exact(fd: RawFd, buf: &mut [u8]) -> io::Result<()> {
    let mut got = 0;
    while got < buf.len() {
        let n = nix::unistd::read(fd, &mut buf[got..]).map_err(io::Error::from)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("expected {} bytes, got {got}", buf.len()),
            ));
        }
        got += n;
    }
    Ok(())
}

/// Reads the fixed-size request header along with whatever `SCM_RIGHTS` FDs
/// ride alongside it (the client sends both in a single `sendmsg`). Returns
/// `Ok(None)` on a clean EOF observed at the very first byte; returns `Err` on a short read after bytes have started arriving.
pub fn recv_header_with_fds(
    sock_fd: RawFd,
    header: &mut [u8; 8],
    max_fds: usize,
) -> io::Result<Option<Vec<OwnedFd>>> {
    let mut cmsg_buf = nix::cmsg_space!([RawFd; 7]);
    let mut iov = [IoSliceMut::new(header)];
    let msg = recvmsg::<()>(sock_fd, &mut iov, Some(&mut cmsg_buf), MsgFlags::empty())
        .map_err(io::Error::from)?;

    if msg.bytes == 0 {
        return Ok(None);
    }
    if msg.bytes != header.len() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("expected {} header bytes, got {}", header.len(), msg.bytes),
        ));
    }

    let mut fds = Vec::new();
    for cmsg in msg.cmsgs().map_err(io::Error::from)? {
        if let ControlMessageOwned::ScmRights(received) = cmsg {
            for raw in received {
                fds.push(unsafe { OwnedFd::from_raw_fd(raw) });
            }
        }
    }
    fds.truncate(max_fds);
    Ok(Some(fds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;

    fn is_open(fd: RawFd) -> bool {
        unsafe { libc::fcntl(fd, libc::F_GETFD) != -1 }
    }

    #[test]
    fn close_fds_except_keeps_only_the_listed_fds() {
        let keep = std::fs::File::open("/dev/null").unwrap();
        let victim = std::fs::File::open("/dev/null").unwrap();
        assert!(is_open(victim.as_raw_fd()));

        close_fds_except(&[0, 1, 2, keep.as_raw_fd()]).unwrap();

        assert!(is_open(keep.as_raw_fd()));
        assert!(!is_open(victim.as_raw_fd()));
    }

    #[test]
    fn recv_header_with_fds_reports_clean_eof() {
        let (a, b) = nix::sys::socket::socketpair(
            nix::sys::socket::AddressFamily::Unix,
            nix::sys::socket::SockType::Stream,
            None,
            nix::sys::socket::SockFlag::empty(),
        )
        .unwrap();
        drop(b);

        let mut header = [0u8; 8];
        let result = recv_header_with_fds(a.as_raw_fd(), &mut header, 7).unwrap();
        assert!(result.is_none());
    }
}
