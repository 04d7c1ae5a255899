//! `prlimit64(2)` application. `nix::resource` wraps
//! `setrlimit`/`getrlimit` but not `prlimit64` on an explicit pid, so this
//! goes through `libc::prlimit` directly, the way `vinit::pidfd` reaches for
//! a raw syscall where `nix` stops short.

use sandbox_proto::Prlimit;

use crate::error::{ErrnoExt, PhaseResult};

fn set_one(resource: libc::c_int, value: u64) -> PhaseResult<()> {
    let new = libc::rlimit {
        rlim_cur: value,
        rlim_max: value,
    };
    unsafe { libc::prlimit(0, resource as libc::__rlimit_resource_t, &new, std::ptr::null_mut()) }
        .or_errno("prlimit64()")?;
    Ok(())
}

pub fn apply(limits: &Prlimit) -> PhaseResult<()> {
    if let Some(v) = limits.max_address_space_size_in_bytes {
        set_one(libc::RLIMIT_AS, v)?;
    }
    if let Some(v) = limits.max_core_file_size_in_bytes {
        set_one(libc::RLIMIT_CORE, v)?;
    }
    if let Some(v) = limits.cpu_time_limit_in_seconds {
        set_one(libc::RLIMIT_CPU, v)?;
    }
    if let Some(v) = limits.max_file_size_in_bytes {
        set_one(libc::RLIMIT_FSIZE, v)?;
    }
    if let Some(v) = limits.file_descriptors_num_limit {
        set_one(libc::RLIMIT_NOFILE, v)?;
    }
    if let Some(v) = limits.max_stack_size_in_bytes {
        set_one(libc::RLIMIT_STACK, v)?;
    }
    Ok(())
}
