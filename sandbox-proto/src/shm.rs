//! Page-sized shared-memory state blocks used as a one-shot result/error
//! channel between the supervisor, pid1 and the tracee.
//! Grounded on
//! `original_source/simlib/src/sandbox/communication/supervisor_pid1_tracee.hh`
//! and `supervisor_tracee.hh`: a page is `mmap`ed `MAP_SHARED | MAP_ANONYMOUS`
//! by the supervisor before `clone3`, inherited by the children, and treated
//! as volatile by every reader since a writer may die mid-write.

use std::mem::size_of;
use std::time::Duration;

use crate::types::Si;

pub const PAGE_SIZE: usize = 4096;

/// Monotonic timestamp as stored in shared memory: `seconds < 0` means unset.
#[repr(C)]
#[derive(Clone, Copy)]
struct RawTime {
    seconds: i64,
    nanoseconds: u32,
}

fn read_time(raw: &RawTime) -> Option<Duration> {
    if raw.seconds < 0 {
        None
    } else {
        Some(Duration::new(raw.seconds as u64, raw.nanoseconds))
    }
}

fn write_time(raw: &mut RawTime, value: Option<Duration>) {
    match value {
        None => {
            raw.seconds = -1;
            raw.nanoseconds = 0;
        }
        Some(d) => {
            raw.seconds = d.as_secs() as i64;
            raw.nanoseconds = d.subsec_nanos();
        }
    }
}

/// Microsecond counter biased by +1 so that zero means "unset".
#[repr(C)]
#[derive(Clone, Copy)]
struct RawUsec {
    usec_plus_one: u64,
}

fn read_usec(raw: &RawUsec) -> Option<u64> {
    if raw.usec_plus_one == 0 {
        None
    } else {
        Some(raw.usec_plus_one - 1)
    }
}

fn write_usec(raw: &mut RawUsec, value: Option<u64>) {
    raw.usec_plus_one = value.map(|v| v + 1).unwrap_or(0);
}

const ERROR_DESCRIPTION_CAP: usize = PAGE_SIZE
    - size_of::<RawTime>() * 2
    - size_of::<RawUsec>() * 2
    - size_of::<i16>()
    - 8 /* alignment padding to match the Si union's natural alignment */;

#[repr(C)]
struct Pid1Layout {
    tracee_exec_start_time: RawTime,
    tracee_exec_start_cpu_time_user: RawUsec,
    tracee_exec_start_cpu_time_system: RawUsec,
    tracee_waitid_time: RawTime,
    error_len: i16,
    description_or_si: [u8; ERROR_DESCRIPTION_CAP],
}

const _: () = assert!(size_of::<Pid1Layout>() <= PAGE_SIZE);

/// The supervisor<->pid1 shared page.
///
/// # Safety
/// The underlying memory is shared with other processes and must be
/// `mmap`ed `MAP_SHARED`; every access goes through `read_volatile` /
/// `write_volatile` so the compiler never elides or reorders a write that a
/// concurrently-running process depends on observing.
#[derive(Clone, Copy)]
pub struct Pid1SharedState {
    ptr: *mut Pid1Layout,
}

// The pointer refers to memory mapped MAP_SHARED, which is exactly the
// sharing model Send/Sync are meant to describe here: every access is a
// volatile read/write and callers serialize writer vs. reader by process
// lifetime.
unsafe impl Send for Pid1SharedState {}
unsafe impl Sync for Pid1SharedState {}

impl Pid1SharedState {
    /// Wraps a page-sized, page-aligned `MAP_SHARED` mapping. `ptr` must
    /// remain valid (mapped) for the lifetime of the returned value.
    ///
    /// # Safety
    /// `ptr` must point to at least `PAGE_SIZE` bytes of writable, properly
    /// aligned shared memory.
    pub unsafe fn from_raw(ptr: *mut u8) -> Self {
        debug_assert_eq!(ptr as usize % PAGE_SIZE, 0);
        Self { ptr: ptr as *mut Pid1Layout }
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr as *mut u8
    }

    /// Zeroes the page then reinitializes it to the "no result yet" state.
    pub fn reset(&self) {
        unsafe {
            std::ptr::write_bytes(self.ptr as *mut u8, 0, PAGE_SIZE);
            let p = &mut *self.ptr;
            write_time(&mut p.tracee_exec_start_time, None);
            write_usec(&mut p.tracee_exec_start_cpu_time_user, None);
            write_usec(&mut p.tracee_exec_start_cpu_time_system, None);
            write_time(&mut p.tracee_waitid_time, None);
            std::ptr::write_volatile(&mut p.error_len, -1);
        }
    }

    pub fn set_tracee_exec_start_time(&self, ts: Option<Duration>) {
        unsafe {
            write_time(&mut (*self.ptr).tracee_exec_start_time, ts);
        }
    }

    pub fn tracee_exec_start_time(&self) -> Option<Duration> {
        unsafe { read_time(&(*self.ptr).tracee_exec_start_time) }
    }

    pub fn set_tracee_exec_start_cpu_time(&self, user_usec: Option<u64>, system_usec: Option<u64>) {
        unsafe {
            write_usec(&mut (*self.ptr).tracee_exec_start_cpu_time_user, user_usec);
            write_usec(&mut (*self.ptr).tracee_exec_start_cpu_time_system, system_usec);
        }
    }

    pub fn tracee_exec_start_cpu_time(&self) -> (Option<u64>, Option<u64>) {
        unsafe {
            (
                read_usec(&(*self.ptr).tracee_exec_start_cpu_time_user),
                read_usec(&(*self.ptr).tracee_exec_start_cpu_time_system),
            )
        }
    }

    pub fn set_tracee_waitid_time(&self, ts: Option<Duration>) {
        unsafe {
            write_time(&mut (*self.ptr).tracee_waitid_time, ts);
        }
    }

    pub fn tracee_waitid_time(&self) -> Option<Duration> {
        unsafe { read_time(&(*self.ptr).tracee_waitid_time) }
    }

    /// Writes the `Ok(Si)` result tag (`error_len == 0`).
    pub fn write_result_ok(&self, si: Si) {
        unsafe {
            let p = &mut *self.ptr;
            p.description_or_si[0..4].copy_from_slice(&si.code.to_ne_bytes());
            p.description_or_si[4..8].copy_from_slice(&si.status.to_ne_bytes());
            std::ptr::write_volatile(&mut p.error_len, 0);
        }
    }

    /// Writes an error description (`error_len > 0`), truncating to the
    /// page's remaining capacity exactly as `write_result_error` does in the
    /// original, which silently truncates rather than failing.
    pub fn write_result_error(&self, message: &str) {
        let bytes = message.as_bytes();
        let len = bytes.len().min(ERROR_DESCRIPTION_CAP);
        unsafe {
            let p = &mut *self.ptr;
            p.description_or_si[..len].copy_from_slice(&bytes[..len]);
            std::ptr::write_volatile(&mut p.error_len, len as i16);
        }
    }

    /// The result tag: `None` before anything is written, `Some(Ok(si))` or
    /// `Some(Err(description))` after.
    pub fn read_result(&self) -> Option<Result<Si, String>> {
        unsafe {
            let p = &*self.ptr;
            let error_len = std::ptr::read_volatile(&p.error_len);
            if error_len < 0 {
                None
            } else if error_len == 0 {
                let code = i32::from_ne_bytes(p.description_or_si[0..4].try_into().unwrap());
                let status = i32::from_ne_bytes(p.description_or_si[4..8].try_into().unwrap());
                Some(Ok(Si { code, status }))
            } else {
                let len = error_len as usize;
                Some(Err(String::from_utf8_lossy(&p.description_or_si[..len]).into_owned()))
            }
        }
    }
}

#[repr(C)]
struct TraceeLayout {
    error_len: u16,
    description: [u8; PAGE_SIZE - size_of::<u16>()],
}

const _: () = assert!(size_of::<TraceeLayout>() <= PAGE_SIZE);

/// The supervisor<->tracee shared page:
/// purely an error channel, written by the tracee stub before it has
/// anything else to report through (it has not yet `execveat`'d).
#[derive(Clone, Copy)]
pub struct TraceeSharedState {
    ptr: *mut TraceeLayout,
}

unsafe impl Send for TraceeSharedState {}
unsafe impl Sync for TraceeSharedState {}

impl TraceeSharedState {
    /// # Safety
    /// `ptr` must point to at least `PAGE_SIZE` bytes of writable, properly
    /// aligned shared memory.
    pub unsafe fn from_raw(ptr: *mut u8) -> Self {
        debug_assert_eq!(ptr as usize % PAGE_SIZE, 0);
        Self { ptr: ptr as *mut TraceeLayout }
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr as *mut u8
    }

    pub fn reset(&self) {
        unsafe {
            std::ptr::write_bytes(self.ptr as *mut u8, 0, PAGE_SIZE);
            std::ptr::write_volatile(&mut (*self.ptr).error_len, 0);
        }
    }

    pub fn write_error(&self, message: &str) {
        let bytes = message.as_bytes();
        let cap = PAGE_SIZE - size_of::<u16>();
        let len = bytes.len().min(cap);
        unsafe {
            let p = &mut *self.ptr;
            p.description[..len].copy_from_slice(&bytes[..len]);
            std::ptr::write_volatile(&mut p.error_len, len as u16);
        }
    }

    /// `None` when no error was written (`error_len == 0`).
    pub fn read_error(&self) -> Option<String> {
        unsafe {
            let p = &*self.ptr;
            let len = std::ptr::read_volatile(&p.error_len) as usize;
            if len == 0 {
                None
            } else {
                Some(String::from_utf8_lossy(&p.description[..len]).into_owned())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alloc_page() -> *mut u8 {
        unsafe {
            let ptr = libc::mmap(
                std::ptr::null_mut(),
                PAGE_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            assert_ne!(ptr, libc::MAP_FAILED);
            ptr as *mut u8
        }
    }

    #[test]
    fn pid1_state_round_trips_ok_result() {
        let page = alloc_page();
        let state = unsafe { Pid1SharedState::from_raw(page) };
        state.reset();
        assert_eq!(state.read_result(), None);

        state.set_tracee_exec_start_time(Some(Duration::from_secs(5)));
        state.set_tracee_exec_start_cpu_time(Some(100), Some(200));
        state.set_tracee_waitid_time(Some(Duration::from_secs(6)));
        state.write_result_ok(Si { code: libc::CLD_EXITED, status: 0 });

        assert_eq!(state.tracee_exec_start_time(), Some(Duration::from_secs(5)));
        assert_eq!(state.tracee_exec_start_cpu_time(), (Some(100), Some(200)));
        assert_eq!(state.tracee_waitid_time(), Some(Duration::from_secs(6)));
        assert_eq!(
            state.read_result(),
            Some(Ok(Si { code: libc::CLD_EXITED, status: 0 }))
        );

        unsafe { libc::munmap(page as *mut _, PAGE_SIZE) };
    }

    #[test]
    fn pid1_state_round_trips_error_result() {
        let page = alloc_page();
        let state = unsafe { Pid1SharedState::from_raw(page) };
        state.reset();
        state.write_result_error("pid1: clock_gettime() - Success");
        assert_eq!(
            state.read_result(),
            Some(Err("pid1: clock_gettime() - Success".to_string()))
        );
        unsafe { libc::munmap(page as *mut _, PAGE_SIZE) };
    }

    #[test]
    fn pid1_state_reset_clears_previous_error() {
        let page = alloc_page();
        let state = unsafe { Pid1SharedState::from_raw(page) };
        state.reset();
        state.write_result_error("leftover from a previous request");
        state.reset();
        assert_eq!(state.read_result(), None);
        unsafe { libc::munmap(page as *mut _, PAGE_SIZE) };
    }

    #[test]
    fn tracee_state_round_trips_error() {
        let page = alloc_page();
        let state = unsafe { TraceeSharedState::from_raw(page) };
        state.reset();
        assert_eq!(state.read_error(), None);
        state.write_error("tracee: execveat() - No such file or directory (os error 2)");
        assert_eq!(
            state.read_error(),
            Some("tracee: execveat() - No such file or directory (os error 2)".to_string())
        );
        unsafe { libc::munmap(page as *mut _, PAGE_SIZE) };
    }

    #[test]
    fn usec_bias_distinguishes_zero_from_unset() {
        let mut raw = RawUsec { usec_plus_one: 0 };
        assert_eq!(read_usec(&raw), None);
        write_usec(&mut raw, Some(0));
        assert_eq!(read_usec(&raw), Some(0));
    }
}
