//! Per-request cgroup v2 leaves: creation under the delegated subtree,
//! limit writes, accounting reads, forced kill, and teardown. Grounded on
//! `sandbox.cc`'s delegated-subtree discovery/creation sequence, generalized
//! from "one subtree for the supervisor" to "one leaf per pid1/tracee per
//! request".

use std::fs;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng as _;
use sandbox_proto::{Cgroup, CgroupAccounting};

#[derive(Clone)]
pub struct CgroupLeaf {
    pub path: PathBuf,
}

fn random_name() -> String {
    let mut rng = rand::thread_rng();
    (0..16)
        .map(|_| std::char::from_digit(rng.gen_range(0..16), 16).unwrap())
        .collect()
}

impl CgroupLeaf {
    /// Creates a uniquely-named leaf under `parent`, retrying on `EEXIST`
    /// the way the delegated subtree itself is created.
    pub fn create(parent: &Path) -> io::Result<Self> {
        loop {
            let path = parent.join(random_name());
            match fs::create_dir(&path) {
                Ok(()) => return Ok(Self { path }),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn apply_limits(&self, cgroup: &Cgroup) -> io::Result<()> {
        if let Some(n) = cgroup.process_num_limit {
            fs::write(self.path.join("pids.max"), n.to_string())?;
        }
        if let Some(bytes) = cgroup.memory_limit_in_bytes {
            fs::write(self.path.join("memory.max"), bytes.to_string())?;
        }
        if let Some(bytes) = cgroup.swap_limit_in_bytes {
            fs::write(self.path.join("memory.swap.max"), bytes.to_string())?;
        }
        if let Some(bw) = cgroup.cpu_max_bandwidth {
            fs::write(
                self.path.join("cpu.max"),
                format!("{} {}", bw.max_usec, bw.period_usec),
            )?;
        }
        Ok(())
    }

    /// An `O_PATH` directory fd suitable as a `clone3` `cgroup` target
    /// (`CLONE_INTO_CGROUP`).
    pub fn open_dir_fd(&self) -> io::Result<OwnedFd> {
        use std::os::fd::FromRawFd;
        use std::os::unix::ffi::OsStrExt;
        let cpath = std::ffi::CString::new(self.path.as_os_str().as_bytes()).unwrap();
        let fd = unsafe { libc::open(cpath.as_ptr(), libc::O_PATH | libc::O_DIRECTORY | libc::O_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    /// Forced termination via `cgroup.kill` (kernel 5.14+); every process in
    /// the subtree is sent `SIGKILL`.
    pub fn kill(&self) -> io::Result<()> {
        fs::write(self.path.join("cgroup.kill"), "1")
    }

    /// `(user_usec, system_usec)` read from `cpu.stat`.
    pub fn cpu_usec(&self) -> io::Result<(u64, u64)> {
        let stat = fs::read_to_string(self.path.join("cpu.stat"))?;
        let mut user = 0u64;
        let mut system = 0u64;
        for line in stat.lines() {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("user_usec"), Some(v)) => user = v.parse().unwrap_or(0),
                (Some("system_usec"), Some(v)) => system = v.parse().unwrap_or(0),
                _ => {}
            }
        }
        Ok((user, system))
    }

    pub fn peak_memory(&self) -> io::Result<u64> {
        let raw = fs::read_to_string(self.path.join("memory.peak"))?;
        Ok(raw.trim().parse().unwrap_or(0))
    }

    /// Resource accounting relative to a baseline recorded at tracee
    /// `execveat` time.
    pub fn accounting_since(&self, baseline_user_usec: u64, baseline_system_usec: u64) -> io::Result<CgroupAccounting> {
        let (user, system) = self.cpu_usec()?;
        Ok(CgroupAccounting {
            cpu_time_user: Duration::from_micros(user.saturating_sub(baseline_user_usec)),
            cpu_time_system: Duration::from_micros(system.saturating_sub(baseline_system_usec)),
            peak_memory_in_bytes: self.peak_memory()?,
        })
    }

    /// Waits (with a short grace period) for `cgroup.procs` to drain, then
    /// removes the leaf. `rmdir` on a cgroup with processes still exiting
    /// returns `EBUSY`, so callers must wait for them to empty out first.
    pub fn teardown(self) -> io::Result<()> {
        let deadline = Instant::now() + Duration::from_millis(500);
        loop {
            let procs = fs::read_to_string(self.path.join("cgroup.procs"))?;
            if procs.trim().is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        fs::remove_dir(&self.path)
    }
}

pub fn enable_controllers(path: &Path) -> io::Result<()> {
    fs::write(path.join("cgroup.subtree_control"), "+pids +memory +cpu")
}
