//! Fixed little-endian binary codec for the client <-> supervisor wire
//! protocol. Two phases mirror
//! `original_source/simlib/src/sandbox/client/request/serialize.cc`'s
//! `Writer<Phase::CountLen>` / `Writer<Phase::Serialize>` split: first count
//! the required body size, then fill a buffer of exactly that size.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::{
    Cgroup, CpuMaxBandwidth, LinuxNamespaces, MountNamespace, MountOperation, Outcome, Prlimit,
    RequestOptions, Si, UserNamespace,
};

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("string cannot contain a null byte: {0:?}")]
    EmbeddedNul(Vec<u8>),
    #[error("declared length {declared} exceeds the remaining {remaining} bytes in the buffer")]
    Truncated { declared: usize, remaining: usize },
    #[error("unknown mount operation kind {0}")]
    UnknownMountKind(u8),
    #[error("body length in header ({header}) does not match the decoded body size ({decoded})")]
    BodyLenMismatch { header: u64, decoded: u64 },
    #[error("invalid UTF-8 in error description")]
    InvalidUtf8,
}

pub mod fds_mask {
    pub const STDIN: u8 = 1 << 0;
    pub const STDOUT: u8 = 1 << 1;
    pub const STDERR: u8 = 1 << 2;
    pub const SECCOMP_BPF: u8 = 1 << 3;
}

mod user_mask {
    pub const INSIDE_UID: u8 = 1 << 0;
    pub const INSIDE_GID: u8 = 1 << 1;
}

mod mount_flags {
    pub const TMPFS_MAX_SIZE: u8 = 1 << 0;
    pub const TMPFS_INODE_LIMIT: u8 = 1 << 1;
    pub const TMPFS_READ_ONLY: u8 = 1 << 2;
    pub const TMPFS_NO_EXEC: u8 = 1 << 3;

    pub const PROC_READ_ONLY: u8 = 1 << 0;
    pub const PROC_NO_EXEC: u8 = 1 << 1;

    pub const BIND_RECURSIVE: u8 = 1 << 0;
    pub const BIND_READ_ONLY: u8 = 1 << 1;
    pub const BIND_NO_EXEC: u8 = 1 << 2;
}

mod cgroup_mask {
    pub const PROCESS_NUM_LIMIT: u8 = 1 << 0;
    pub const MEMORY_LIMIT_IN_BYTES: u8 = 1 << 1;
    pub const SWAP_LIMIT_IN_BYTES: u8 = 1 << 2;
    pub const CPU_MAX_BANDWIDTH: u8 = 1 << 3;
}

mod prlimit_mask {
    pub const MAX_ADDRESS_SPACE: u8 = 1 << 0;
    pub const MAX_CORE_FILE_SIZE: u8 = 1 << 1;
    pub const CPU_TIME_LIMIT_SECONDS: u8 = 1 << 2;
    pub const MAX_FILE_SIZE: u8 = 1 << 3;
    pub const FD_NUM_LIMIT: u8 = 1 << 4;
    pub const MAX_STACK_SIZE: u8 = 1 << 5;
}

/// A sink that either counts bytes or writes them; implemented by
/// [`CountingWriter`] and [`BufWriter`] so the encoding logic below is
/// written exactly once.
trait Sink {
    fn put(&mut self, bytes: &[u8]);
}

struct CountingWriter {
    len: usize,
}

impl Sink for CountingWriter {
    fn put(&mut self, bytes: &[u8]) {
        self.len += bytes.len();
    }
}

struct BufWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Sink for BufWriter<'a> {
    fn put(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }
}

fn write_u8<S: Sink>(s: &mut S, v: u8) {
    s.put(&[v]);
}
fn write_u16<S: Sink>(s: &mut S, v: u16) {
    s.put(&v.to_le_bytes());
}
fn write_u32<S: Sink>(s: &mut S, v: u32) {
    s.put(&v.to_le_bytes());
}
fn write_u64<S: Sink>(s: &mut S, v: u64) {
    s.put(&v.to_le_bytes());
}
fn write_i32<S: Sink>(s: &mut S, v: i32) {
    s.put(&v.to_le_bytes());
}
fn write_i64<S: Sink>(s: &mut S, v: i64) {
    s.put(&v.to_le_bytes());
}

fn write_null_terminated<S: Sink>(s: &mut S, bytes: &[u8]) -> Result<(), ProtocolError> {
    if bytes.contains(&0) {
        return Err(ProtocolError::EmbeddedNul(bytes.to_vec()));
    }
    s.put(bytes);
    s.put(&[0]);
    Ok(())
}

fn write_user_ns<S: Sink>(s: &mut S, u: &UserNamespace) {
    let mut mask = 0u8;
    if u.inside_uid.is_some() {
        mask |= user_mask::INSIDE_UID;
    }
    if u.inside_gid.is_some() {
        mask |= user_mask::INSIDE_GID;
    }
    write_u8(s, mask);
    if let Some(uid) = u.inside_uid {
        write_u32(s, uid);
    }
    if let Some(gid) = u.inside_gid {
        write_u32(s, gid);
    }
}

fn write_path<S: Sink>(s: &mut S, path: &Path) -> Result<(), ProtocolError> {
    use std::os::unix::ffi::OsStrExt;
    write_null_terminated(s, path.as_os_str().as_bytes())
}

fn write_mount_op<S: Sink>(s: &mut S, op: &MountOperation) -> Result<(), ProtocolError> {
    write_u8(s, op.kind_tag());
    match op {
        MountOperation::MountTmpfs {
            path,
            max_total_size_of_files_in_bytes,
            inode_limit,
            root_dir_mode,
            read_only,
            no_exec,
        } => {
            let mut flags = 0u8;
            if max_total_size_of_files_in_bytes.is_some() {
                flags |= mount_flags::TMPFS_MAX_SIZE;
            }
            if inode_limit.is_some() {
                flags |= mount_flags::TMPFS_INODE_LIMIT;
            }
            if *read_only {
                flags |= mount_flags::TMPFS_READ_ONLY;
            }
            if *no_exec {
                flags |= mount_flags::TMPFS_NO_EXEC;
            }
            write_u8(s, flags);
            write_path(s, path)?;
            if let Some(v) = max_total_size_of_files_in_bytes {
                write_u64(s, *v);
            }
            if let Some(v) = inode_limit {
                write_u64(s, *v);
            }
            write_u16(s, *root_dir_mode);
        }
        MountOperation::MountProc {
            path,
            read_only,
            no_exec,
        } => {
            let mut flags = 0u8;
            if *read_only {
                flags |= mount_flags::PROC_READ_ONLY;
            }
            if *no_exec {
                flags |= mount_flags::PROC_NO_EXEC;
            }
            write_u8(s, flags);
            write_path(s, path)?;
        }
        MountOperation::BindMount {
            source,
            dest,
            recursive,
            read_only,
            no_exec,
        } => {
            let mut flags = 0u8;
            if *recursive {
                flags |= mount_flags::BIND_RECURSIVE;
            }
            if *read_only {
                flags |= mount_flags::BIND_READ_ONLY;
            }
            if *no_exec {
                flags |= mount_flags::BIND_NO_EXEC;
            }
            write_u8(s, flags);
            write_path(s, source)?;
            write_path(s, dest)?;
        }
        MountOperation::CreateDir { path, mode } => {
            write_path(s, path)?;
            write_u16(s, *mode);
        }
        MountOperation::CreateFile { path, mode } => {
            write_path(s, path)?;
            write_u16(s, *mode);
        }
    }
    Ok(())
}

fn write_mount_ns<S: Sink>(s: &mut S, m: &MountNamespace) -> Result<(), ProtocolError> {
    write_u32(s, m.operations.len() as u32);
    for op in &m.operations {
        write_mount_op(s, op)?;
    }
    match &m.new_root_mount_path {
        None => write_u32(s, 0),
        Some(path) => {
            use std::os::unix::ffi::OsStrExt;
            let bytes = path.as_os_str().as_bytes();
            if bytes.contains(&0) {
                return Err(ProtocolError::EmbeddedNul(bytes.to_vec()));
            }
            write_u32(s, (bytes.len() + 1) as u32);
            s.put(bytes);
            s.put(&[0]);
        }
    }
    Ok(())
}

fn write_cgroup<S: Sink>(s: &mut S, c: &Cgroup) {
    let mut mask = 0u8;
    if c.process_num_limit.is_some() {
        mask |= cgroup_mask::PROCESS_NUM_LIMIT;
    }
    if c.memory_limit_in_bytes.is_some() {
        mask |= cgroup_mask::MEMORY_LIMIT_IN_BYTES;
    }
    if c.swap_limit_in_bytes.is_some() {
        mask |= cgroup_mask::SWAP_LIMIT_IN_BYTES;
    }
    if c.cpu_max_bandwidth.is_some() {
        mask |= cgroup_mask::CPU_MAX_BANDWIDTH;
    }
    write_u8(s, mask);
    if let Some(v) = c.process_num_limit {
        write_u32(s, v);
    }
    if let Some(v) = c.memory_limit_in_bytes {
        write_u64(s, v);
    }
    if let Some(v) = c.swap_limit_in_bytes {
        write_u64(s, v);
    }
    if let Some(CpuMaxBandwidth { max_usec, period_usec }) = c.cpu_max_bandwidth {
        write_u32(s, max_usec);
        write_u32(s, period_usec);
    }
}

fn write_prlimit<S: Sink>(s: &mut S, p: &Prlimit) {
    let mut mask = 0u8;
    if p.max_address_space_size_in_bytes.is_some() {
        mask |= prlimit_mask::MAX_ADDRESS_SPACE;
    }
    if p.max_core_file_size_in_bytes.is_some() {
        mask |= prlimit_mask::MAX_CORE_FILE_SIZE;
    }
    if p.cpu_time_limit_in_seconds.is_some() {
        mask |= prlimit_mask::CPU_TIME_LIMIT_SECONDS;
    }
    if p.max_file_size_in_bytes.is_some() {
        mask |= prlimit_mask::MAX_FILE_SIZE;
    }
    if p.file_descriptors_num_limit.is_some() {
        mask |= prlimit_mask::FD_NUM_LIMIT;
    }
    if p.max_stack_size_in_bytes.is_some() {
        mask |= prlimit_mask::MAX_STACK_SIZE;
    }
    write_u8(s, mask);
    for v in [
        p.max_address_space_size_in_bytes,
        p.max_core_file_size_in_bytes,
        p.cpu_time_limit_in_seconds,
        p.max_file_size_in_bytes,
        p.file_descriptors_num_limit,
        p.max_stack_size_in_bytes,
    ] {
        if let Some(v) = v {
            write_u64(s, v);
        }
    }
}

fn write_optional_duration<S: Sink>(s: &mut S, d: Option<Duration>) {
    match d {
        None => {
            write_i64(s, -1);
            write_u32(s, 0);
        }
        Some(d) => {
            write_i64(s, d.as_secs() as i64);
            write_u32(s, d.subsec_nanos());
        }
    }
}

fn encode_body<S: Sink>(
    s: &mut S,
    fds_mask: u8,
    argv: &[Vec<u8>],
    options: &RequestOptions,
) -> Result<(), ProtocolError> {
    write_u8(s, fds_mask);

    write_u32(s, argv.len() as u32);
    for arg in argv {
        write_null_terminated(s, arg)?;
    }

    write_u32(s, options.env.len() as u32);
    for e in &options.env {
        write_null_terminated(s, e)?;
    }

    write_user_ns(s, &options.linux_namespaces.user);
    write_mount_ns(s, &options.linux_namespaces.mount)?;
    write_cgroup(s, &options.cgroup);
    write_prlimit(s, &options.prlimit);
    write_optional_duration(s, options.time_limit);
    write_optional_duration(s, options.cpu_time_limit);

    Ok(())
}

/// Encodes a request body, returning the bytes to send after the `u64`
/// header. Performs the counting pass first, exactly as
/// `serialize.cc` does with its two `Writer` phases.
pub fn encode_request(
    fds_mask: u8,
    argv: &[Vec<u8>],
    options: &RequestOptions,
) -> Result<Vec<u8>, ProtocolError> {
    let mut counter = CountingWriter { len: 0 };
    encode_body(&mut counter, fds_mask, argv, options)?;

    let mut buf = vec![0u8; counter.len];
    let mut writer = BufWriter { buf: &mut buf, pos: 0 };
    encode_body(&mut writer, fds_mask, argv, options)?;
    debug_assert_eq!(writer.pos, buf.len());
    Ok(buf)
}

pub fn encode_header(body_len: u64) -> [u8; 8] {
    body_len.to_le_bytes()
}

// ---- Decoding (supervisor side) ----

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < n {
            return Err(ProtocolError::Truncated {
                declared: n,
                remaining: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }
    fn u16(&mut self) -> Result<u16, ProtocolError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }
    fn u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }
    fn u64(&mut self) -> Result<u64, ProtocolError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
    fn i64(&mut self) -> Result<i64, ProtocolError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn null_terminated(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let start = self.pos;
        loop {
            let b = self.u8()?;
            if b == 0 {
                break;
            }
        }
        Ok(self.buf[start..self.pos - 1].to_vec())
    }

    fn optional_duration(&mut self) -> Result<Option<Duration>, ProtocolError> {
        let sec = self.i64()?;
        let nsec = self.u32()?;
        if sec < 0 {
            Ok(None)
        } else {
            Ok(Some(Duration::new(sec as u64, nsec)))
        }
    }
}

/// Decoded request body, ready for the supervisor to act on. FDs are not
/// part of the body; the caller matches ancillary-data FDs against
/// `fds_mask` itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRequest {
    pub fds_mask: u8,
    pub argv: Vec<Vec<u8>>,
    pub options: RequestOptions,
}

fn decode_user_ns(c: &mut Cursor) -> Result<UserNamespace, ProtocolError> {
    let mask = c.u8()?;
    let inside_uid = if mask & user_mask::INSIDE_UID != 0 {
        Some(c.u32()?)
    } else {
        None
    };
    let inside_gid = if mask & user_mask::INSIDE_GID != 0 {
        Some(c.u32()?)
    } else {
        None
    };
    Ok(UserNamespace { inside_uid, inside_gid })
}

fn decode_path(c: &mut Cursor) -> Result<PathBuf, ProtocolError> {
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt;
    Ok(PathBuf::from(OsString::from_vec(c.null_terminated()?)))
}

fn decode_mount_op(c: &mut Cursor) -> Result<MountOperation, ProtocolError> {
    let kind = c.u8()?;
    Ok(match kind {
        1 => {
            let flags = c.u8()?;
            let path = decode_path(c)?;
            let max_total_size_of_files_in_bytes = if flags & mount_flags::TMPFS_MAX_SIZE != 0 {
                Some(c.u64()?)
            } else {
                None
            };
            let inode_limit = if flags & mount_flags::TMPFS_INODE_LIMIT != 0 {
                Some(c.u64()?)
            } else {
                None
            };
            let root_dir_mode = c.u16()?;
            MountOperation::MountTmpfs {
                path,
                max_total_size_of_files_in_bytes,
                inode_limit,
                root_dir_mode,
                read_only: flags & mount_flags::TMPFS_READ_ONLY != 0,
                no_exec: flags & mount_flags::TMPFS_NO_EXEC != 0,
            }
        }
        2 => {
            let flags = c.u8()?;
            let path = decode_path(c)?;
            MountOperation::MountProc {
                path,
                read_only: flags & mount_flags::PROC_READ_ONLY != 0,
                no_exec: flags & mount_flags::PROC_NO_EXEC != 0,
            }
        }
        3 => {
            let flags = c.u8()?;
            let source = decode_path(c)?;
            let dest = decode_path(c)?;
            MountOperation::BindMount {
                source,
                dest,
                recursive: flags & mount_flags::BIND_RECURSIVE != 0,
                read_only: flags & mount_flags::BIND_READ_ONLY != 0,
                no_exec: flags & mount_flags::BIND_NO_EXEC != 0,
            }
        }
        4 => {
            let path = decode_path(c)?;
            let mode = c.u16()?;
            MountOperation::CreateDir { path, mode }
        }
        5 => {
            let path = decode_path(c)?;
            let mode = c.u16()?;
            MountOperation::CreateFile { path, mode }
        }
        other => return Err(ProtocolError::UnknownMountKind(other)),
    })
}

fn decode_mount_ns(c: &mut Cursor) -> Result<MountNamespace, ProtocolError> {
    let n = c.u32()?;
    let mut operations = Vec::with_capacity(n as usize);
    for _ in 0..n {
        operations.push(decode_mount_op(c)?);
    }
    let path_len = c.u32()?;
    let new_root_mount_path = if path_len == 0 {
        None
    } else {
        let bytes = c.take(path_len as usize - 1)?.to_vec();
        let _nul = c.u8()?;
        use std::ffi::OsString;
        use std::os::unix::ffi::OsStringExt;
        Some(PathBuf::from(OsString::from_vec(bytes)))
    };
    Ok(MountNamespace {
        operations,
        new_root_mount_path,
    })
}

fn decode_cgroup(c: &mut Cursor) -> Result<Cgroup, ProtocolError> {
    let mask = c.u8()?;
    let process_num_limit = if mask & cgroup_mask::PROCESS_NUM_LIMIT != 0 {
        Some(c.u32()?)
    } else {
        None
    };
    let memory_limit_in_bytes = if mask & cgroup_mask::MEMORY_LIMIT_IN_BYTES != 0 {
        Some(c.u64()?)
    } else {
        None
    };
    let swap_limit_in_bytes = if mask & cgroup_mask::SWAP_LIMIT_IN_BYTES != 0 {
        Some(c.u64()?)
    } else {
        None
    };
    let cpu_max_bandwidth = if mask & cgroup_mask::CPU_MAX_BANDWIDTH != 0 {
        let max_usec = c.u32()?;
        let period_usec = c.u32()?;
        Some(CpuMaxBandwidth { max_usec, period_usec })
    } else {
        None
    };
    Ok(Cgroup {
        process_num_limit,
        memory_limit_in_bytes,
        swap_limit_in_bytes,
        cpu_max_bandwidth,
    })
}

fn decode_prlimit(c: &mut Cursor) -> Result<Prlimit, ProtocolError> {
    let mask = c.u8()?;
    let mut get = |bit: u8| -> Result<Option<u64>, ProtocolError> {
        if mask & bit != 0 {
            Ok(Some(c.u64()?))
        } else {
            Ok(None)
        }
    };
    Ok(Prlimit {
        max_address_space_size_in_bytes: get(prlimit_mask::MAX_ADDRESS_SPACE)?,
        max_core_file_size_in_bytes: get(prlimit_mask::MAX_CORE_FILE_SIZE)?,
        cpu_time_limit_in_seconds: get(prlimit_mask::CPU_TIME_LIMIT_SECONDS)?,
        max_file_size_in_bytes: get(prlimit_mask::MAX_FILE_SIZE)?,
        file_descriptors_num_limit: get(prlimit_mask::FD_NUM_LIMIT)?,
        max_stack_size_in_bytes: get(prlimit_mask::MAX_STACK_SIZE)?,
    })
}

pub fn decode_header(header: [u8; 8]) -> u64 {
    u64::from_le_bytes(header)
}

/// Decodes a request body. `body.len()` must equal the header-declared
/// length; callers are expected to have validated that already.
pub fn decode_request(body: &[u8]) -> Result<DecodedRequest, ProtocolError> {
    let mut c = Cursor::new(body);
    let fds_mask = c.u8()?;

    let argv_len = c.u32()?;
    let mut argv = Vec::with_capacity(argv_len as usize);
    for _ in 0..argv_len {
        argv.push(c.null_terminated()?);
    }

    let env_len = c.u32()?;
    let mut env = Vec::with_capacity(env_len as usize);
    for _ in 0..env_len {
        env.push(c.null_terminated()?);
    }

    let user = decode_user_ns(&mut c)?;
    let mount = decode_mount_ns(&mut c)?;
    let cgroup = decode_cgroup(&mut c)?;
    let prlimit = decode_prlimit(&mut c)?;
    let time_limit = c.optional_duration()?;
    let cpu_time_limit = c.optional_duration()?;

    Ok(DecodedRequest {
        fds_mask,
        argv,
        options: RequestOptions {
            env,
            linux_namespaces: LinuxNamespaces { user, mount },
            cgroup,
            prlimit,
            time_limit,
            cpu_time_limit,
        },
    })
}

// ---- Response (supervisor -> client) ----

/// Encodes the supervisor's response to a request.
pub fn encode_response(outcome: &Outcome) -> Vec<u8> {
    match outcome {
        Outcome::Ok { si, runtime, cgroup } => {
            let mut buf = Vec::with_capacity(4 + 8 + 8 + 24);
            buf.extend_from_slice(&0u32.to_le_bytes());
            buf.extend_from_slice(&si.code.to_le_bytes());
            buf.extend_from_slice(&si.status.to_le_bytes());
            buf.extend_from_slice(&runtime.as_secs().to_le_bytes());
            buf.extend_from_slice(&runtime.subsec_nanos().to_le_bytes());
            buf.extend_from_slice(&(cgroup.cpu_time_user.as_micros() as u64).to_le_bytes());
            buf.extend_from_slice(&(cgroup.cpu_time_system.as_micros() as u64).to_le_bytes());
            buf.extend_from_slice(&cgroup.peak_memory_in_bytes.to_le_bytes());
            buf
        }
        Outcome::Error { description } => {
            let bytes = description.as_bytes();
            let mut buf = Vec::with_capacity(4 + bytes.len());
            buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            buf.extend_from_slice(bytes);
            buf
        }
    }
}

/// Decodes the fixed-size response prefix: returns either the error length
/// (caller must then read that many bytes) or the complete `Ok` outcome
/// parsed from the rest of `rest`.
pub fn decode_response_prefix(prefix: [u8; 4]) -> u32 {
    u32::from_le_bytes(prefix)
}

pub fn decode_response_ok(body: &[u8; RESPONSE_OK_BODY_LEN]) -> Result<Outcome, ProtocolError> {
    let mut c = Cursor::new(body);
    let code = c.u32()? as i32;
    let status = c.u32()? as i32;
    let runtime_sec = c.u64()?;
    let runtime_nsec = c.u32()?;
    let cpu_user_usec = c.u64()?;
    let cpu_system_usec = c.u64()?;
    let peak_mem = c.u64()?;
    Ok(Outcome::Ok {
        si: Si { code, status },
        runtime: Duration::new(runtime_sec, runtime_nsec),
        cgroup: crate::types::CgroupAccounting {
            cpu_time_user: Duration::from_micros(cpu_user_usec),
            cpu_time_system: Duration::from_micros(cpu_system_usec),
            peak_memory_in_bytes: peak_mem,
        },
    })
}

pub fn decode_response_error(bytes: &[u8]) -> Result<Outcome, ProtocolError> {
    let description = String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)?;
    Ok(Outcome::Error { description })
}

/// Byte size of the `Ok` response body that follows the 4-byte `error_len`
/// prefix: `si(8) + runtime(12) + cgroup cpu(16) + peak_mem(8)`.
pub const RESPONSE_OK_BODY_LEN: usize = 4 + 4 + 8 + 4 + 8 + 8 + 8;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CpuMaxBandwidth, MountOperation};
    use std::path::PathBuf;

    #[test]
    fn round_trips_a_minimal_request() {
        let options = RequestOptions::default();
        let argv = vec![b"/bin/true".to_vec()];
        let body = encode_request(0, &argv, &options).unwrap();
        let decoded = decode_request(&body).unwrap();
        assert_eq!(decoded.fds_mask, 0);
        assert_eq!(decoded.argv, argv);
        assert_eq!(decoded.options, options);
    }

    #[test]
    fn round_trips_every_optional_field() {
        let mut options = RequestOptions::default();
        options.env = vec![b"PATH=/bin".to_vec(), b"HOME=/root".to_vec()];
        options.linux_namespaces.user.inside_uid = Some(1000);
        options.linux_namespaces.user.inside_gid = Some(1000);
        options.linux_namespaces.mount.operations = vec![
            MountOperation::MountTmpfs {
                path: PathBuf::from("/tmp"),
                max_total_size_of_files_in_bytes: Some(4096),
                inode_limit: Some(16),
                root_dir_mode: 0o755,
                read_only: false,
                no_exec: true,
            },
            MountOperation::MountProc {
                path: PathBuf::from("/proc"),
                read_only: true,
                no_exec: false,
            },
            MountOperation::BindMount {
                source: PathBuf::from("/usr"),
                dest: PathBuf::from("/newroot/usr"),
                recursive: true,
                read_only: true,
                no_exec: false,
            },
            MountOperation::CreateDir {
                path: PathBuf::from("/newroot/tmp"),
                mode: 0o1777,
            },
            MountOperation::CreateFile {
                path: PathBuf::from("/newroot/dev/null"),
                mode: 0o666,
            },
        ];
        options.linux_namespaces.mount.new_root_mount_path = Some(PathBuf::from("/newroot"));
        options.cgroup = Cgroup {
            process_num_limit: Some(32),
            memory_limit_in_bytes: Some(256 << 20),
            swap_limit_in_bytes: Some(0),
            cpu_max_bandwidth: Some(CpuMaxBandwidth {
                max_usec: 100_000,
                period_usec: 100_000,
            }),
        };
        options.prlimit = Prlimit {
            max_address_space_size_in_bytes: Some(1 << 30),
            max_core_file_size_in_bytes: Some(0),
            cpu_time_limit_in_seconds: Some(10),
            max_file_size_in_bytes: Some(1 << 20),
            file_descriptors_num_limit: Some(64),
            max_stack_size_in_bytes: Some(8 << 20),
        };
        options.time_limit = Some(Duration::from_millis(1500));
        options.cpu_time_limit = Some(Duration::from_millis(1000));

        let argv = vec![b"/usr/bin/bash".to_vec(), b"-c".to_vec(), b"true".to_vec()];
        let body = encode_request(fds_mask::STDIN | fds_mask::STDOUT, &argv, &options).unwrap();
        let decoded = decode_request(&body).unwrap();
        assert_eq!(decoded.fds_mask, fds_mask::STDIN | fds_mask::STDOUT);
        assert_eq!(decoded.argv, argv);
        assert_eq!(decoded.options, options);
    }

    #[test]
    fn rejects_embedded_nul_in_argv() {
        let options = RequestOptions::default();
        let argv = vec![b"bad\0arg".to_vec()];
        let err = encode_request(0, &argv, &options).unwrap_err();
        assert!(matches!(err, ProtocolError::EmbeddedNul(_)));
    }

    #[test]
    fn rejects_truncated_body() {
        let err = decode_request(&[0u8; 3]).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { .. }));
    }

    #[test]
    fn rejects_unknown_mount_kind() {
        // fds.mask=0, argv.len=0, env.len=0, user.mask=0, operations_len=1, kind=9
        let body = [0u8, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 9];
        let err = decode_request(&body).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownMountKind(9)));
    }

    #[test]
    fn response_ok_round_trips() {
        let outcome = Outcome::Ok {
            si: Si { code: libc::CLD_EXITED, status: 0 },
            runtime: Duration::from_millis(42),
            cgroup: crate::types::CgroupAccounting {
                cpu_time_user: Duration::from_micros(100),
                cpu_time_system: Duration::from_micros(200),
                peak_memory_in_bytes: 4096,
            },
        };
        let encoded = encode_response(&outcome);
        let error_len = decode_response_prefix(encoded[0..4].try_into().unwrap());
        assert_eq!(error_len, 0);
        let body: [u8; RESPONSE_OK_BODY_LEN] = encoded[4..].try_into().unwrap();
        assert_eq!(decode_response_ok(&body).unwrap(), outcome);
    }

    #[test]
    fn response_error_round_trips() {
        let outcome = Outcome::Error {
            description: "pid1: clock_gettime() - Success".to_string(),
        };
        let encoded = encode_response(&outcome);
        let error_len = decode_response_prefix(encoded[0..4].try_into().unwrap());
        assert_eq!(error_len as usize, encoded.len() - 4);
        assert_eq!(decode_response_error(&encoded[4..]).unwrap(), outcome);
    }
}
