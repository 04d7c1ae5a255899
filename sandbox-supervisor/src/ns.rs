//! User-namespace id mapping. Grounded on `pid1.cc`'s
//! `setup_user_namespace`: write `uid_map`, deny `setgroups`, then `gid_map`,
//! in that order — `gid_map` fails with `EPERM` if written before
//! `setgroups` is denied.

use std::fs::OpenOptions;
use std::io::Write;

use sandbox_proto::UserNamespace;

use crate::error::{PhaseError, PhaseResult};

fn write_file(path: &'static str, data: &str) -> PhaseResult<()> {
    let mut f = OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|e| PhaseError::new("open()", e))?;
    f.write_all(data.as_bytes())
        .map_err(|e| PhaseError::new("write()", e))
}

/// `inside_uid`/`inside_gid` default to the caller's own euid/egid when not
/// given (the original always supplies both from the request, so an absent
/// value here maps identity, keeping the namespace a no-op for that axis).
pub fn setup(user_ns: &UserNamespace) -> PhaseResult<()> {
    let outside_uid = unsafe { libc::geteuid() };
    let outside_gid = unsafe { libc::getegid() };
    let inside_uid = user_ns.inside_uid.unwrap_or(outside_uid);
    let inside_gid = user_ns.inside_gid.unwrap_or(outside_gid);

    write_file("/proc/self/uid_map", &format!("{inside_uid} {outside_uid} 1"))?;
    write_file("/proc/self/setgroups", "deny")?;
    write_file("/proc/self/gid_map", &format!("{inside_gid} {outside_gid} 1"))?;
    Ok(())
}
