//! POSIX shared-memory region and its process-shared mutex.
//!
//! The region is the rendezvous between the core and any out-of-process
//! observer: a 4-byte magic word, one `PTHREAD_PROCESS_SHARED` mutex, and
//! the `CoreState` record. Whoever opens the named object first creates
//! and initializes it; later openers map the existing region and poll the
//! magic word until the creator has published it. The object itself lives
//! until the OS removes it (or [`unlink`] is called).
//!
//! Locking discipline: the mutex is held for the entirety of any write and
//! for the full duration of any multi-field read. Callers must not block
//! or perform I/O inside [`SharedState::with_lock`].

use std::ffi::CString;
use std::io;
use std::mem;
use std::ptr::{self, NonNull};
use std::sync::atomic::{fence, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::config::StrategyParams;
use crate::state::CoreState;

/// Name of the POSIX shared-memory object.
pub const SHM_NAME: &str = "/pockettrader_shm";

/// Magic word ('PKTR') published by the creator after initialization.
pub const SHM_MAGIC: u32 = 0x504B_5452;

const MAGIC_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// On-disk (well, in-page) layout of the shared region.
#[repr(C)]
pub struct SharedRegion {
    magic: u32,
    mutex: libc::pthread_mutex_t,
    state: CoreState,
}

/// Handle to the mapped shared region.
pub struct SharedState {
    region: NonNull<SharedRegion>,
    created: bool,
}

// The raw pointer targets a shared mapping whose mutation is serialized by
// the embedded process-shared mutex; handles may move between threads.
unsafe impl Send for SharedState {}
unsafe impl Sync for SharedState {}

struct LockGuard {
    mutex: *mut libc::pthread_mutex_t,
}

impl LockGuard {
    fn acquire(mutex: *mut libc::pthread_mutex_t) -> Self {
        let rc = unsafe { libc::pthread_mutex_lock(mutex) };
        assert_eq!(rc, 0, "shared state mutex lock failed: {rc}");
        Self { mutex }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        unsafe {
            libc::pthread_mutex_unlock(self.mutex);
        }
    }
}

impl SharedState {
    /// Map the named region, creating and initializing it if this process
    /// is first. On attach, blocks until the creator has published the
    /// magic word. Failure to create or map the region is fatal to the
    /// caller.
    pub fn open_or_create(name: &str, defaults: &StrategyParams) -> Result<Self> {
        let c_name = CString::new(name).context("shared memory name contains NUL")?;
        let size = mem::size_of::<SharedRegion>();

        let mut created = true;
        let mut fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                0o666,
            )
        };
        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EEXIST) {
                return Err(err).with_context(|| format!("shm_open({name})"));
            }
            created = false;
            fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0o666) };
            if fd < 0 {
                return Err(io::Error::last_os_error())
                    .with_context(|| format!("shm_open existing ({name})"));
            }
        }

        if created && unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(fd);
                libc::shm_unlink(c_name.as_ptr());
            }
            return Err(err).context("ftruncate shared region");
        }

        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        unsafe {
            libc::close(fd);
        }
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error()).context("mmap shared region");
        }
        let region = match NonNull::new(ptr as *mut SharedRegion) {
            Some(region) => region,
            None => bail!("mmap returned a null mapping"),
        };

        let handle = SharedState { region, created };
        if created {
            handle.init_region(defaults)?;
        } else {
            handle.wait_for_magic();
        }
        Ok(handle)
    }

    /// Whether this handle created (and initialized) the region.
    #[inline]
    pub fn created(&self) -> bool {
        self.created
    }

    /// Run `f` with exclusive access to the shared record. The mutex is
    /// released on every exit path, including a panic inside `f`.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut CoreState) -> R) -> R {
        let region = self.region.as_ptr();
        let _guard = LockGuard::acquire(unsafe { ptr::addr_of_mut!((*region).mutex) });
        let state = unsafe { &mut *ptr::addr_of_mut!((*region).state) };
        f(state)
    }

    fn init_region(&self, defaults: &StrategyParams) -> Result<()> {
        let region = self.region.as_ptr();

        // A fresh ftruncate'd object is zero-filled; only the mutex needs
        // real construction.
        unsafe {
            let mut attr: libc::pthread_mutexattr_t = mem::zeroed();
            if libc::pthread_mutexattr_init(&mut attr) != 0 {
                bail!("pthread_mutexattr_init failed");
            }
            if libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED) != 0 {
                libc::pthread_mutexattr_destroy(&mut attr);
                bail!("pthread_mutexattr_setpshared failed");
            }
            let rc = libc::pthread_mutex_init(ptr::addr_of_mut!((*region).mutex), &attr);
            libc::pthread_mutexattr_destroy(&mut attr);
            if rc != 0 {
                bail!("pthread_mutex_init failed: {rc}");
            }
        }

        self.with_lock(|state| {
            *state = CoreState::zeroed();
            state.min_spread = defaults.min_spread;
            state.strategy_mode = defaults.mode.as_raw();
            state.trade_size = defaults.trade_size;
        });

        // The magic word goes last so attachers never observe a
        // half-initialized region.
        fence(Ordering::Release);
        unsafe {
            ptr::write_volatile(ptr::addr_of_mut!((*region).magic), SHM_MAGIC);
        }
        Ok(())
    }

    fn wait_for_magic(&self) {
        let region = self.region.as_ptr();
        loop {
            let magic = unsafe { ptr::read_volatile(ptr::addr_of!((*region).magic)) };
            if magic == SHM_MAGIC {
                break;
            }
            thread::sleep(MAGIC_POLL_INTERVAL);
        }
        fence(Ordering::Acquire);
    }
}

impl Drop for SharedState {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(
                self.region.as_ptr() as *mut libc::c_void,
                mem::size_of::<SharedRegion>(),
            );
        }
    }
}

/// Remove the named object. The core never unlinks its own region (the
/// region outlives the process so observers keep their view); this is for
/// operator cleanup and tests.
pub fn unlink(name: &str) -> io::Result<()> {
    let c_name =
        CString::new(name).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "NUL in name"))?;
    if unsafe { libc::shm_unlink(c_name.as_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
