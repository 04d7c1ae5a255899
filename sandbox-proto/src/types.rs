//! Request/response data model shared between the client library and the
//! supervisor binary. Field layout follows
//! `original_source/simlib/src/sandbox/communication/client_supervisor.hh`.

use std::path::PathBuf;
use std::time::Duration;

/// `RequestOptions::LinuxNamespaces::User`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserNamespace {
    pub inside_uid: Option<u32>,
    pub inside_gid: Option<u32>,
}

/// One entry of the ordered mount-operation list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountOperation {
    MountTmpfs {
        path: PathBuf,
        max_total_size_of_files_in_bytes: Option<u64>,
        inode_limit: Option<u64>,
        root_dir_mode: u16,
        read_only: bool,
        no_exec: bool,
    },
    MountProc {
        path: PathBuf,
        read_only: bool,
        no_exec: bool,
    },
    BindMount {
        source: PathBuf,
        dest: PathBuf,
        recursive: bool,
        read_only: bool,
        no_exec: bool,
    },
    CreateDir {
        path: PathBuf,
        mode: u16,
    },
    CreateFile {
        path: PathBuf,
        mode: u16,
    },
}

impl MountOperation {
    pub(crate) fn kind_tag(&self) -> u8 {
        match self {
            MountOperation::MountTmpfs { .. } => 1,
            MountOperation::MountProc { .. } => 2,
            MountOperation::BindMount { .. } => 3,
            MountOperation::CreateDir { .. } => 4,
            MountOperation::CreateFile { .. } => 5,
        }
    }
}

/// `RequestOptions::LinuxNamespaces::Mount`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountNamespace {
    pub operations: Vec<MountOperation>,
    pub new_root_mount_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinuxNamespaces {
    pub user: UserNamespace,
    pub mount: MountNamespace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuMaxBandwidth {
    pub max_usec: u32,
    pub period_usec: u32,
}

/// `RequestOptions::Cgroup`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cgroup {
    pub process_num_limit: Option<u32>,
    pub memory_limit_in_bytes: Option<u64>,
    pub swap_limit_in_bytes: Option<u64>,
    pub cpu_max_bandwidth: Option<CpuMaxBandwidth>,
}

/// `RequestOptions::Prlimit`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Prlimit {
    pub max_address_space_size_in_bytes: Option<u64>,
    pub max_core_file_size_in_bytes: Option<u64>,
    pub cpu_time_limit_in_seconds: Option<u64>,
    pub max_file_size_in_bytes: Option<u64>,
    pub file_descriptors_num_limit: Option<u64>,
    pub max_stack_size_in_bytes: Option<u64>,
}

/// Everything in a request besides `argv` and the borrowed stdio/seccomp FDs,
/// which `send_request` takes as separate arguments but which are
/// folded into the wire body together with these fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    pub env: Vec<Vec<u8>>,
    pub linux_namespaces: LinuxNamespaces,
    pub cgroup: Cgroup,
    pub prlimit: Prlimit,
    pub time_limit: Option<Duration>,
    pub cpu_time_limit: Option<Duration>,
}

/// `Si` — the `(code, status)` pair produced by `waitid`, per POSIX.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Si {
    pub code: i32,
    pub status: i32,
}

impl Si {
    /// Renders a human sentence the way the original's `Si::description()`
    /// does, e.g. `"killed by signal KILL - Killed"` or `"exited with 0"`.
    pub fn description(&self) -> String {
        match self.code {
            libc::CLD_EXITED => format!("exited with {}", self.status),
            libc::CLD_KILLED => format!(
                "killed by signal {} - {}",
                signal_name(self.status),
                signal_strerror(self.status)
            ),
            libc::CLD_DUMPED => format!(
                "killed by signal {} - {} (core dumped)",
                signal_name(self.status),
                signal_strerror(self.status)
            ),
            libc::CLD_STOPPED => format!("stopped by signal {}", signal_name(self.status)),
            libc::CLD_CONTINUED => "continued".to_string(),
            other => format!("unknown si_code {other} with status {}", self.status),
        }
    }
}

fn signal_name(sig: i32) -> &'static str {
    match sig {
        libc::SIGKILL => "KILL",
        libc::SIGSEGV => "SEGV",
        libc::SIGABRT => "ABRT",
        libc::SIGBUS => "BUS",
        libc::SIGFPE => "FPE",
        libc::SIGTERM => "TERM",
        libc::SIGXCPU => "XCPU",
        libc::SIGXFSZ => "XFSZ",
        libc::SIGSYS => "SYS",
        libc::SIGPIPE => "PIPE",
        _ => "?",
    }
}

fn signal_strerror(sig: i32) -> String {
    // SAFETY: strsignal returns a pointer to a static/thread-local string owned by libc.
    unsafe {
        let ptr = libc::strsignal(sig);
        if ptr.is_null() {
            return "Unknown signal".to_string();
        }
        std::ffi::CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

/// Resource accounting read from the tracee's cgroup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CgroupAccounting {
    pub cpu_time_user: Duration,
    pub cpu_time_system: Duration,
    pub peak_memory_in_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_normal_exit() {
        let si = Si { code: libc::CLD_EXITED, status: 0 };
        assert_eq!(si.description(), "exited with 0");

        let si = Si { code: libc::CLD_EXITED, status: 7 };
        assert_eq!(si.description(), "exited with 7");
    }

    #[test]
    fn describes_killed_by_known_signal() {
        let si = Si { code: libc::CLD_KILLED, status: libc::SIGKILL };
        assert_eq!(si.description(), "killed by signal KILL - Killed");
    }

    #[test]
    fn describes_killed_by_unrecognized_signal_name() {
        let si = Si { code: libc::CLD_KILLED, status: libc::SIGWINCH };
        assert!(si.description().starts_with("killed by signal ? - "));
    }

    #[test]
    fn describes_core_dump() {
        let si = Si { code: libc::CLD_DUMPED, status: libc::SIGSEGV };
        assert_eq!(si.description(), "killed by signal SEGV - Segmentation fault (core dumped)");
    }

    #[test]
    fn describes_stopped_and_continued() {
        let si = Si { code: libc::CLD_STOPPED, status: libc::SIGSTOP };
        assert_eq!(si.description(), "stopped by signal ?");

        let si = Si { code: libc::CLD_CONTINUED, status: 0 };
        assert_eq!(si.description(), "continued");
    }

    #[test]
    fn describes_unknown_code() {
        let si = Si { code: 9999, status: 3 };
        assert_eq!(si.description(), "unknown si_code 9999 with status 3");
    }

    #[test]
    fn cgroup_default_has_no_limits() {
        let cgroup = Cgroup::default();
        assert_eq!(cgroup.process_num_limit, None);
        assert_eq!(cgroup.memory_limit_in_bytes, None);
        assert_eq!(cgroup.swap_limit_in_bytes, None);
        assert_eq!(cgroup.cpu_max_bandwidth, None);
    }

    #[test]
    fn mount_operation_kind_tags_are_distinct() {
        let ops = vec![
            MountOperation::MountTmpfs {
                path: PathBuf::from("/tmp"),
                max_total_size_of_files_in_bytes: None,
                inode_limit: None,
                root_dir_mode: 0o755,
                read_only: false,
                no_exec: false,
            },
            MountOperation::MountProc { path: PathBuf::from("/proc"), read_only: false, no_exec: false },
            MountOperation::BindMount {
                source: PathBuf::from("/a"),
                dest: PathBuf::from("/b"),
                recursive: false,
                read_only: true,
                no_exec: true,
            },
            MountOperation::CreateDir { path: PathBuf::from("/x"), mode: 0o755 },
            MountOperation::CreateFile { path: PathBuf::from("/y"), mode: 0o644 },
        ];
        let tags: Vec<u8> = ops.iter().map(|op| op.kind_tag()).collect();
        assert_eq!(tags, vec![1, 2, 3, 4, 5]);
    }
}

/// The supervisor's response, as delivered to `await_result`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ok {
        si: Si,
        runtime: Duration,
        cgroup: CgroupAccounting,
    },
    Error {
        description: String,
    },
}
