//! Client library for the sandbox supervisor: connection bootstrap (C3),
//! request lifecycle (C4), and client-side error taxonomy (C8).
//!
//! ```no_run
//! use sandbox_client::{spawn_supervisor, ExecutableSelector, RequestFds};
//! use sandbox_proto::RequestOptions;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let conn = spawn_supervisor()?;
//! let handle = conn.send_request(
//!     ExecutableSelector::Path("/bin/true"),
//!     &[b"/bin/true".to_vec()],
//!     RequestFds::default(),
//!     RequestOptions::default(),
//! )?;
//! let outcome = conn.await_result(handle)?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

mod bootstrap;
mod clone3;
mod connection;
mod error;
mod fd;

pub use bootstrap::spawn_supervisor;
pub use connection::{ExecutableSelector, KillRequestHandle, RequestFds, RequestHandle, SupervisorConnection};
pub use error::{RequestError, SandboxError};

pub use sandbox_proto::{
    Cgroup, CgroupAccounting, CpuMaxBandwidth, LinuxNamespaces, MountNamespace, MountOperation,
    Outcome, Prlimit, RequestOptions, Si, UserNamespace,
};
