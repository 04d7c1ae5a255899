//! Small file-descriptor helpers shared by bootstrap and connection code:
//! exact-size send/recv loops and `SCM_RIGHTS` ancillary passing. Grounded on
//! the send/recv-loop style of `vinit::pidfd` (raw syscalls where `nix`
//! doesn't help) and on the "send_exact" / "sendmsg" wording used throughout
//! this protocol.

use std::io::{self, IoSlice};
use std::os::fd::{BorrowedFd, RawFd};

use nix::sys::socket::{sendmsg, ControlMessage, MsgFlags};

/// Sends `buf` in full, looping on short writes.
pub fn send_exact(fd: RawFd, buf: &[u8]) -> io::Result<()> {
    let mut sent = 0;
    while sent < buf.len() {
        let n = nix::unistd::write(unsafe { BorrowedFd::borrow_raw(fd) }, &buf[sent..])
            .map_err(io::Error::from)?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
        }
        sent += n;
    }
    Ok(())
}

/// Reads exactly `buf.len()` bytes, returning `Ok(false)` on a clean EOF at
/// the very first byte (used to detect "supervisor exited cleanly") and
/// `Err` on a short read after data has already started arriving.
pub fn recv_exact(fd: RawFd, buf: &mut [u8]) -> io::Result<bool> {
    let mut got = 0;
    while got < buf.len() {
        let n = nix::unistd::read(fd, &mut buf[got..]).map_err(io::Error::from)?;
        if n == 0 {
            if got == 0 {
                return Ok(false);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("expected {} bytes, got {got}", buf.len()),
            ));
        }
        got += n;
    }
    Ok(true)
}

/// Sends `header` with up to 7 ancillary FDs attached via `SCM_RIGHTS`, then
/// the body, in that order.
pub fn send_header_with_fds_then_body(
    sock_fd: RawFd,
    header: &[u8],
    fds: &[RawFd],
    body: &[u8],
) -> io::Result<()> {
    let iov = [IoSlice::new(header)];
    let cmsg = [ControlMessage::ScmRights(fds)];
    sendmsg::<()>(sock_fd, &iov, &cmsg, MsgFlags::MSG_NOSIGNAL, None).map_err(io::Error::from)?;
    send_exact(sock_fd, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::socket::{recvmsg, ControlMessageOwned};
    use std::io::IoSliceMut;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

    /// Test-only mirror of the supervisor's ancillary-FD reception, kept here
    /// only to verify `send_header_with_fds_then_body` round-trips FDs; the
    /// client never itself receives ancillary FDs in production.
    fn recv_with_fds(sock_fd: RawFd, buf: &mut [u8], max_fds: usize) -> io::Result<Vec<OwnedFd>> {
        let mut cmsg_buf = nix::cmsg_space!([RawFd; 7]);
        let mut iov = [IoSliceMut::new(buf)];
        let msg = recvmsg::<()>(sock_fd, &mut iov, Some(&mut cmsg_buf), MsgFlags::empty())
            .map_err(io::Error::from)?;

        let mut fds = Vec::new();
        for cmsg in msg.cmsgs().map_err(io::Error::from)? {
            if let ControlMessageOwned::ScmRights(received) = cmsg {
                for raw in received {
                    fds.push(unsafe { OwnedFd::from_raw_fd(raw) });
                }
            }
        }
        if fds.len() > max_fds {
            fds.truncate(max_fds);
        }
        Ok(fds)
    }

    fn socketpair() -> (OwnedFd, OwnedFd) {
        let (a, b) = nix::sys::socket::socketpair(
            nix::sys::socket::AddressFamily::Unix,
            nix::sys::socket::SockType::Stream,
            None,
            nix::sys::socket::SockFlag::empty(),
        )
        .unwrap();
        (a, b)
    }

    #[test]
    fn send_exact_recv_exact_round_trip() {
        let (a, b) = socketpair();
        let payload = b"hello sandbox";
        send_exact(a.as_raw_fd(), payload).unwrap();

        let mut buf = [0u8; 13];
        assert!(recv_exact(b.as_raw_fd(), &mut buf).unwrap());
        assert_eq!(&buf, payload);
    }

    #[test]
    fn recv_exact_reports_clean_eof_at_message_start() {
        let (a, b) = socketpair();
        drop(a);

        let mut buf = [0u8; 4];
        assert!(!recv_exact(b.as_raw_fd(), &mut buf).unwrap());
    }

    #[test]
    fn send_header_with_fds_then_body_round_trips_fds_and_bytes() {
        let (a, b) = socketpair();
        let passenger = std::fs::File::open("/dev/null").unwrap();
        let header = [1u8, 2, 3, 4];
        let body = b"request body";

        send_header_with_fds_then_body(a.as_raw_fd(), &header, &[passenger.as_raw_fd()], body).unwrap();

        let mut recv_header = [0u8; 4];
        let fds = recv_with_fds(b.as_raw_fd(), &mut recv_header, 7).unwrap();
        assert_eq!(recv_header, header);
        assert_eq!(fds.len(), 1);

        let mut recv_body = vec![0u8; body.len()];
        assert!(recv_exact(b.as_raw_fd(), &mut recv_body).unwrap());
        assert_eq!(&recv_body, body);
    }
}
