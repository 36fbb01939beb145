//! Mapping lifecycle: the two shapes this crate supports for the shared
//! region.
//!
//! `ShmemMapping` adopts the descriptor handed over during the handshake
//! (state `AwaitShmemDescriptor`); `PlainMapping` opens or creates a backing
//! file directly. Both produce a [`View`] over the same mapped bytes, so
//! every accessor in `view.rs` is shared between the doorbell and plain
//! shapes.

use ivshmem_proto::{ErrorKind, Status};
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use crate::view::View;

fn errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// The shared region adopted from the server-provided descriptor (the
/// doorbell shape).
pub struct ShmemMapping {
    mmap: MmapMut,
    view: View,
}

impl ShmemMapping {
    /// `fd` is the descriptor received during handshake step 3
    /// (`AwaitShmemDescriptor`). Sizes the mapping via `fstat`, then maps it
    /// read/write, shared.
    pub fn from_fd(fd: OwnedFd) -> Result<Self, Status> {
        let file = File::from(fd);
        let len = match file.metadata() {
            Ok(meta) => meta.len(),
            Err(_) => return Err(Status::combine(ErrorKind::ErrorShmemFstat, errno())),
        };

        // SAFETY: the fd was handed to us by the server specifically to be
        // mapped; we are the sole owner of this `File` going forward.
        let mmap = match unsafe { memmap2::MmapOptions::new().len(len as usize).map_mut(&file) } {
            Ok(m) => m,
            Err(_) => return Err(Status::combine(ErrorKind::ErrorShmemMmap, errno())),
        };

        log::info!("mapped server shared region: {len} bytes");

        // The fd is kept alive by `mmap`'s internal reference; we don't need
        // `file` anymore once the mapping exists.
        let view = unsafe { View::new(mmap.as_ptr() as *mut u8, len) };
        Ok(ShmemMapping { mmap, view })
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn len(&self) -> u64 {
        self.view.len()
    }
}

impl Drop for ShmemMapping {
    fn drop(&mut self) {
        self.view.mark_closed();
        log::debug!("unmapped server shared region ({} bytes)", self.mmap.len());
    }
}

/// Preferred-size, create-if-missing options for [`PlainMapping::open`].
#[derive(Debug, Clone)]
pub struct PlainMappingOptions {
    pub path: std::path::PathBuf,
    pub preferred_size: u64,
}

/// File-backed shared mapping with no doorbell (the plain shape). A strict
/// subset of the doorbell shape: same `View`, no server socket, no peers.
pub struct PlainMapping {
    _file: File,
    mmap: MmapMut,
    view: View,
}

impl PlainMapping {
    /// Open or create the backing file at `opts.path`. If the file is
    /// empty, it is extended to `opts.preferred_size` bytes by seeking to
    /// the last byte and writing a single zero byte — a "no holes" grow
    /// instead of `ftruncate`, so the pages are not left unbacked on
    /// filesystems that treat a truncate-grow as a sparse hole. If the file
    /// already has a size, that size wins over `preferred_size`.
    pub fn open(opts: &PlainMappingOptions) -> Result<Self, Status> {
        Self::open_path(&opts.path, opts.preferred_size)
    }

    fn open_path(path: &Path, preferred_size: u64) -> Result<Self, Status> {
        let mut file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(0o777)
            .open(path)
        {
            Ok(f) => f,
            Err(_) => return Err(Status::combine(ErrorKind::OpenFailure, errno())),
        };

        let existing_len = match file.metadata() {
            Ok(meta) => meta.len(),
            Err(_) => return Err(Status::combine(ErrorKind::ErrorShmemFstat, errno())),
        };

        let len = if existing_len != 0 {
            existing_len
        } else {
            if preferred_size > 1 {
                if file.seek(SeekFrom::Start(preferred_size - 1)).is_err() {
                    return Err(Status::combine(ErrorKind::ErrorShmemFileSetSize, errno()));
                }
            }
            if file.write(&[0u8]).map(|n| n) != Ok(1) {
                return Err(Status::combine(ErrorKind::ErrorShmemFileSetSize, errno()));
            }
            preferred_size
        };

        let mmap = match unsafe { memmap2::MmapOptions::new().len(len as usize).map_mut(&file) } {
            Ok(m) => m,
            Err(_) => return Err(Status::combine(ErrorKind::ErrorShmemMmap, errno())),
        };

        log::info!(
            "opened plain mapping at {:?}, fd={}, size={len}",
            path,
            file.as_raw_fd()
        );

        let view = unsafe { View::new(mmap.as_ptr() as *mut u8, len) };
        Ok(PlainMapping {
            _file: file,
            mmap,
            view,
        })
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn len(&self) -> u64 {
        self.view.len()
    }

    /// Explicit close. Idempotent: calling this more than once, or letting
    /// `Drop` run afterward, is safe — the flag only ever transitions
    /// false -> true.
    pub fn close(&mut self) {
        self.view.mark_closed();
    }
}

impl Drop for PlainMapping {
    fn drop(&mut self) {
        self.close();
        log::debug!("closed plain mapping ({} bytes)", self.mmap.len());
    }
}
