// HERMES Shared Memory Region - named cross-process memory mapping
//
// Backed by a file in /dev/shm (tmpfs - RAM-backed), falling back to the
// system temp directory on hosts without it. Every participant that opens
// the same name maps the same physical pages.

use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::path::PathBuf;

use crate::error::{HermesError, HermesResult};

/// Directory holding the backing files for all named mappings.
///
/// `/dev/shm` is RAM-backed on Linux, which keeps the bus memory-only in
/// practice. The temp-dir fallback trades that for portability.
pub(crate) fn shm_base_dir() -> PathBuf {
    let dev_shm = PathBuf::from("/dev/shm");
    if dev_shm.is_dir() {
        dev_shm
    } else {
        std::env::temp_dir()
    }
}

/// A named shared memory region.
///
/// Opening the same name from several processes yields views of the same
/// memory. The creator ("owner") zero-fills the region; later joiners see
/// whatever the participants have written so far.
///
/// `ShmRegion` performs no synchronization of its own: callers mediate all
/// access through a cross-process lock and touch the bytes via [`Self::base`].
#[derive(Debug)]
pub struct ShmRegion {
    /// Kept alive for the lifetime of the mapping.
    _mmap: MmapMut,
    _file: File,
    /// Base address of the mapping.
    base: *mut u8,
    path: PathBuf,
    size: usize,
    owner: bool,
}

// SAFETY: ShmRegion is a handle to OS shared memory with no thread-local
// state; concurrent access to the mapped bytes is mediated by the
// cross-process lock in the layer above.
unsafe impl Send for ShmRegion {}
unsafe impl Sync for ShmRegion {}

impl ShmRegion {
    /// Create or open a named shared memory region of exactly `size` bytes.
    ///
    /// Creation is atomic (`O_CREAT | O_EXCL` semantics): exactly one racing
    /// participant becomes the owner and zero-fills the region; everyone
    /// else opens the existing file.
    pub fn open(name: &str, size: usize) -> HermesResult<Self> {
        let path = shm_base_dir().join(name);

        let (file, owner) = match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => {
                file.set_len(size as u64)
                    .map_err(|e| HermesError::primitive("sizing shared region", e))?;
                (file, true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .open(&path)
                    .map_err(|e| HermesError::primitive("opening shared region", e))?;
                // A participant may have configured a larger capacity; never
                // shrink a region other processes have already mapped.
                let metadata = file
                    .metadata()
                    .map_err(|e| HermesError::primitive("inspecting shared region", e))?;
                if metadata.len() < size as u64 {
                    file.set_len(size as u64)
                        .map_err(|e| HermesError::primitive("growing shared region", e))?;
                }
                (file, false)
            }
            Err(e) => return Err(HermesError::primitive("creating shared region", e)),
        };

        // SAFETY: file is open read-write with at least `size` bytes; the
        // mapping length matches what we request here.
        let mut mmap = unsafe {
            MmapOptions::new()
                .len(size)
                .map_mut(&file)
                .map_err(|e| HermesError::primitive("mapping shared region", e))?
        };

        if owner {
            mmap.fill(0);
        }

        let base = mmap.as_mut_ptr();

        Ok(Self {
            _mmap: mmap,
            _file: file,
            base,
            path,
            size,
            owner,
        })
    }

    /// Base address of the mapping.
    ///
    /// # Safety contract
    ///
    /// Reads and writes through this pointer must be coordinated with the
    /// other participants (the bus uses a named read/write lock). The pointer
    /// is valid for `len()` bytes for the lifetime of this `ShmRegion`.
    #[inline]
    pub fn base(&self) -> *mut u8 {
        self.base
    }

    /// Size of the mapping in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    /// Whether this mapping is empty (it never is; kept for API symmetry).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Whether this handle created the region (and zero-filled it).
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Remove the backing file.
    ///
    /// Existing mappings (ours and other processes') stay valid; only the
    /// name disappears, so a later `open` would create a fresh region. The
    /// bus never calls this - a name removed while participants are live
    /// would silently split the bus for late joiners. Tests use it to clean
    /// up their uniquely-named objects.
    pub fn unlink(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
