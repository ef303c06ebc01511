//! Process-local handle cache over POSIX shared memory segments

use std::collections::HashMap;
use std::fs::File;
use std::num::NonZeroUsize;
use std::ptr::NonNull;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::libc::c_void;
use nix::sys::mman::{mmap, munmap, shm_open, shm_unlink, MapFlags, ProtFlags};
use nix::sys::stat::Mode;
use tracing::{debug, warn};

use crate::error::{Result, ShmError};

/// One mapped segment held by this process.
struct Segment {
    ptr: NonNull<c_void>,
    len: usize,
}

impl Segment {
    fn as_slice(&self) -> &[u8] {
        // Mapping is valid for `len` bytes until munmap.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr() as *const u8, self.len) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr() as *mut u8, self.len) }
    }

    fn unmap(self, name: &str) {
        if let Err(e) = unsafe { munmap(self.ptr, self.len) } {
            warn!("failed to unmap segment {name}: {e}");
        }
    }
}

/// Handle cache for name-addressed shared-memory frame buffers.
///
/// The cache remembers only mappings opened by this instance. Ownership is a
/// caller contract: the producer owns a region until it is queued, a single
/// logical consumer owns it until `delete`. `close` never unlinks.
pub struct SharedFrameManager {
    segments: HashMap<String, Segment>,
    stopped: bool,
}

impl SharedFrameManager {
    pub fn new() -> Self {
        Self {
            segments: HashMap::new(),
            stopped: false,
        }
    }

    /// Allocates a new named region and returns the writable view.
    /// Fails with [`ShmError::AlreadyExists`] when the name is taken.
    pub fn create(&mut self, name: &str, size: usize) -> Result<&mut [u8]> {
        if self.stopped {
            return Err(ShmError::Stopped);
        }
        if self.segments.contains_key(name) {
            return Err(ShmError::AlreadyExists(name.to_string()));
        }

        let shm_name = shm_path(name);
        let fd = match shm_open(
            shm_name.as_str(),
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        ) {
            Ok(fd) => fd,
            Err(Errno::EEXIST) => return Err(ShmError::AlreadyExists(name.to_string())),
            Err(e) => return Err(ShmError::sys(name, e)),
        };
        let file = File::from(fd);

        nix::unistd::ftruncate(&file, size as i64).map_err(|e| {
            let _ = shm_unlink(shm_name.as_str());
            ShmError::sys(name, e)
        })?;

        let segment = map_segment(name, &file, size).inspect_err(|_| {
            let _ = shm_unlink(shm_name.as_str());
        })?;
        let entry = self.segments.entry(name.to_string()).or_insert(segment);
        Ok(entry.as_mut_slice())
    }

    /// Opens an existing region read-only. Idempotent: a cached mapping is
    /// reused, an existing region is attached as-is.
    pub fn attach(&mut self, name: &str, expected_len: usize) -> Result<&[u8]> {
        self.attach_segment(name, expected_len)
            .map(|s| &s.as_slice()[..expected_len])
    }

    /// Opens an existing region for writing. The one-writer contract is the
    /// caller's: the pool does not arbitrate concurrent writers.
    pub fn attach_mut(&mut self, name: &str, expected_len: usize) -> Result<&mut [u8]> {
        self.attach_segment(name, expected_len)
            .map(|s| &mut s.as_mut_slice()[..expected_len])
    }

    fn attach_segment(&mut self, name: &str, expected_len: usize) -> Result<&mut Segment> {
        if self.stopped {
            return Err(ShmError::Stopped);
        }
        if !self.segments.contains_key(name) {
            let shm_name = shm_path(name);
            let fd = match shm_open(shm_name.as_str(), OFlag::O_RDWR, Mode::empty()) {
                Ok(fd) => fd,
                Err(Errno::ENOENT) => return Err(ShmError::NotFound(name.to_string())),
                Err(e) => return Err(ShmError::sys(name, e)),
            };
            let file = File::from(fd);
            let actual = file
                .metadata()
                .map_err(|e| ShmError::sys(name, Errno::from_raw(e.raw_os_error().unwrap_or(0))))?
                .len() as usize;
            if actual < expected_len {
                return Err(ShmError::TooSmall {
                    name: name.to_string(),
                    expected: expected_len,
                    actual,
                });
            }
            let segment = map_segment(name, &file, actual)?;
            self.segments.insert(name.to_string(), segment);
        }

        let segment = self.segments.get_mut(name).expect("just inserted");
        if segment.len < expected_len {
            return Err(ShmError::TooSmall {
                name: name.to_string(),
                expected: expected_len,
                actual: segment.len,
            });
        }
        Ok(segment)
    }

    /// Releases the local mapping. The region stays live for other holders.
    pub fn close(&mut self, name: &str) {
        if let Some(segment) = self.segments.remove(name) {
            segment.unmap(name);
        }
    }

    /// Releases the local mapping and unlinks the region globally.
    pub fn delete(&mut self, name: &str) -> Result<()> {
        self.close(name);
        match shm_unlink(shm_path(name).as_str()) {
            Ok(()) => Ok(()),
            Err(Errno::ENOENT) => Err(ShmError::NotFound(name.to_string())),
            Err(e) => Err(ShmError::sys(name, e)),
        }
    }

    /// Marks the manager stopped and unlinks every region it still holds.
    pub fn clean(&mut self) {
        self.stopped = true;
        let names: Vec<String> = self.segments.keys().cloned().collect();
        for name in names {
            debug!("cleaning leftover segment {name}");
            if let Err(e) = self.delete(&name) {
                warn!("failed to clean segment {name}: {e}");
            }
        }
    }

    /// Number of mappings held by this instance.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn holds(&self, name: &str) -> bool {
        self.segments.contains_key(name)
    }
}

impl Default for SharedFrameManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SharedFrameManager {
    fn drop(&mut self) {
        // Local mappings only; unlinking is an explicit clean/delete.
        for (name, segment) in self.segments.drain() {
            segment.unmap(&name);
        }
    }
}

// The mappings are process-global and the cache moves with its owning
// worker thread; no aliasing happens through the manager itself.
unsafe impl Send for SharedFrameManager {}

fn map_segment(name: &str, file: &File, len: usize) -> Result<Segment> {
    let length = NonZeroUsize::new(len)
        .ok_or_else(|| ShmError::sys(name, Errno::EINVAL))?;
    let ptr = unsafe {
        mmap(
            None,
            length,
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            MapFlags::MAP_SHARED,
            file,
            0,
        )
    }
    .map_err(|e| ShmError::sys(name, e))?;
    Ok(Segment { ptr, len })
}

fn shm_path(name: &str) -> String {
    format!("/{name}")
}
