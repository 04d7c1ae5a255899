//! Mount-namespace setup: executes the ordered `MountOperation` list, then
//! the optional pivot_root. Grounded on `pid1.cc`'s
//! phase structure (each step's failure is `"pid1: <op>(<path>) - <errno>"`)
//! and on `nix::mount`'s `MsFlags`/`mount()` wrapper, used the way
//! `vinit::filesystem` and `vinit::startup` call it.

use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::unistd::chdir;

use sandbox_proto::MountOperation;

use crate::error::{ErrnoExt, PhaseError, PhaseResult};

fn remount_ro_noexec(path: &Path, read_only: bool, no_exec: bool) -> PhaseResult<()> {
    if !read_only && !no_exec {
        return Ok(());
    }
    let mut flags = MsFlags::MS_REMOUNT | MsFlags::MS_BIND;
    if read_only {
        flags |= MsFlags::MS_RDONLY;
    }
    if no_exec {
        flags |= MsFlags::MS_NOEXEC;
    }
    mount(None::<&Path>, path, None::<&Path>, flags, None::<&Path>)
        .map_err(|e| PhaseError::new("mount()", e.into()))
}

fn apply_one(op: &MountOperation) -> PhaseResult<()> {
    match op {
        MountOperation::MountTmpfs {
            path,
            max_total_size_of_files_in_bytes,
            inode_limit,
            root_dir_mode,
            read_only,
            no_exec,
        } => {
            if *root_dir_mode > 0o777 {
                return Err(PhaseError::msg(
                    "mount(tmpfs)",
                    &format!("root_dir_mode {root_dir_mode:#o} out of range"),
                ));
            }
            let mut data = format!("mode={root_dir_mode:o}");
            if let Some(size) = max_total_size_of_files_in_bytes {
                data.push_str(&format!(",size={size}"));
            }
            if let Some(inodes) = inode_limit {
                data.push_str(&format!(",nr_inodes={inodes}"));
            }
            mount(
                Some("tmpfs"),
                path.as_path(),
                Some("tmpfs"),
                MsFlags::empty(),
                Some(data.as_str()),
            )
            .map_err(|e| PhaseError::new("mount(tmpfs)", e.into()))?;
            remount_ro_noexec(path, *read_only, *no_exec)
        }
        MountOperation::MountProc { path, read_only, no_exec } => {
            mount(
                Some("proc"),
                path.as_path(),
                Some("proc"),
                MsFlags::empty(),
                None::<&Path>,
            )
            .map_err(|e| PhaseError::new("mount(proc)", e.into()))?;
            remount_ro_noexec(path, *read_only, *no_exec)
        }
        MountOperation::BindMount {
            source,
            dest,
            recursive,
            read_only,
            no_exec,
        } => {
            let mut flags = MsFlags::MS_BIND;
            if *recursive {
                flags |= MsFlags::MS_REC;
            }
            mount(Some(source.as_path()), dest.as_path(), None::<&Path>, flags, None::<&Path>)
                .map_err(|e| PhaseError::new("mount(bind)", e.into()))?;
            remount_ro_noexec(dest, *read_only, *no_exec)
        }
        MountOperation::CreateDir { path, mode } => {
            nix::unistd::mkdir(path.as_path(), nix::sys::stat::Mode::from_bits_truncate(*mode as u32))
                .map_err(|e| PhaseError::new("mkdir()", e.into()))
        }
        MountOperation::CreateFile { path, mode } => {
            let cpath = std::ffi::CString::new(path.as_os_str().as_bytes()).unwrap();
            let fd = unsafe {
                libc::open(cpath.as_ptr(), libc::O_CREAT | libc::O_EXCL | libc::O_WRONLY, *mode as libc::c_uint)
            }
            .or_errno("open()")?;
            unsafe {
                libc::close(fd);
            }
            Ok(())
        }
    }
}

pub fn apply_all(operations: &[MountOperation]) -> PhaseResult<()> {
    for op in operations {
        apply_one(op)?;
    }
    Ok(())
}

/// `chdir(path); pivot_root(".", "."); umount2(".", MNT_DETACH)`. A caller
/// requesting `new_root_mount_path == "/"` is responsible for having mounted
/// a tmpfs at
/// `/` earlier in the operation list so `/` is itself a mountpoint.
pub fn pivot_root(new_root: &Path) -> PhaseResult<()> {
    chdir(new_root).map_err(|e| PhaseError::new("chdir()", e.into()))?;
    nix::unistd::pivot_root(".", ".").map_err(|e| PhaseError::new("pivot_root()", e.into()))?;
    umount2(".", MntFlags::MNT_DETACH).map_err(|e| PhaseError::new("umount2()", e.into()))
}
