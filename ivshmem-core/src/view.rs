//! Bounds-checked scalar and atomic access to a mapped shared-memory region.
//!
//! Every accessor re-derives the same two bounds checks (`offset >= len` and
//! `offset + n > len`), and the atomic accessors wrap [`crate::atomics`]
//! rather than duplicating the lock-prefixed instruction sequences.

use ivshmem_proto::{ErrorKind, Status};
use std::sync::atomic::{AtomicBool, Ordering};

/// A bounds-checked, byte-addressed view over one mapped region.
///
/// `View` does not own the mapping; it borrows the base pointer and length
/// from whichever of [`crate::mapping::ShmemMapping`] or
/// [`crate::mapping::PlainMapping`] created it, so the same accessor code
/// serves both the doorbell and plain shapes — plain mode is a strict
/// subset of the doorbell mapping as far as this component is concerned.
pub struct View {
    base: *mut u8,
    len: u64,
    closed: AtomicBool,
}

// SAFETY: the region `base` points into is shared memory explicitly intended
// for concurrent cross-process access; all single-location races are
// resolved either by the atomic accessors below or by the application
// protocol built on top of this region.
unsafe impl Send for View {}
unsafe impl Sync for View {}

impl View {
    /// # Safety
    /// `base` must be valid for reads and writes of `len` bytes for the
    /// lifetime of this `View`.
    pub unsafe fn new(base: *mut u8, len: u64) -> Self {
        View {
            base,
            len,
            closed: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Advisory: marks the mapping as closed. Does not itself gate further
    /// operations — it exists for owners that want to check `is_closed()`
    /// before deciding whether to keep using the region.
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Checks `offset + n <= len` with `offset >= len` also rejected (so a
    /// zero-length access at the one-past-end offset still fails), and
    /// overflow in `offset + n` is rejected rather than wrapping.
    fn check_bounds(&self, offset: u64, n: u64) -> Result<(), Status> {
        if offset >= self.len {
            return Err(Status::combine(ErrorKind::MemoryOutOfBounds, 0));
        }
        let end = match offset.checked_add(n) {
            Some(end) => end,
            None => return Err(Status::combine(ErrorKind::MemoryOutOfBounds, 0)),
        };
        if end > self.len {
            return Err(Status::combine(ErrorKind::MemoryOutOfBounds, 0));
        }
        Ok(())
    }

    fn ptr_at(&self, offset: u64) -> *mut u8 {
        // SAFETY: caller has already validated `offset` via `check_bounds`.
        unsafe { self.base.add(offset as usize) }
    }

    /// Plain (non-atomic) copy of `buf` into the mapping at `offset`.
    pub fn write_bytes(&self, offset: u64, buf: &[u8]) -> Status {
        let n = buf.len() as u64;
        if let Err(e) = self.check_bounds(offset, n) {
            return e;
        }
        unsafe {
            std::ptr::copy_nonoverlapping(buf.as_ptr(), self.ptr_at(offset), buf.len());
        }
        Status::ok()
    }

    /// Plain (non-atomic) copy of `n` bytes from the mapping at `offset`
    /// into `buf[..n]`. Fails with `BUFFER_OUT_OF_BOUNDS` if `buf` is
    /// shorter than `n`.
    pub fn read_bytes(&self, offset: u64, buf: &mut [u8], n: usize) -> Status {
        if buf.len() < n {
            return Status::combine(ErrorKind::BufferOutOfBounds, 0);
        }
        if let Err(e) = self.check_bounds(offset, n as u64) {
            return e;
        }
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr_at(offset), buf.as_mut_ptr(), n);
        }
        Status::ok()
    }

    /// Fill `n` bytes starting at `offset` with `byte`. Zero-length is a
    /// fast path that always succeeds, even at the one-past-end offset,
    /// since no byte is actually touched.
    pub fn memset_range(&self, offset: u64, byte: u8, n: u64) -> Status {
        if n == 0 {
            return Status::ok();
        }
        if let Err(e) = self.check_bounds(offset, n) {
            return e;
        }
        unsafe {
            std::ptr::write_bytes(self.ptr_at(offset), byte, n as usize);
        }
        Status::ok()
    }
}

macro_rules! scalar_rw {
    ($write:ident, $read:ident, $t:ty, $size:expr) => {
        impl View {
            #[doc = concat!("Single aligned store of a `", stringify!($t), "`.")]
            pub fn $write(&self, offset: u64, value: $t) -> Status {
                if let Err(e) = self.check_bounds(offset, $size) {
                    return e;
                }
                unsafe {
                    (self.ptr_at(offset) as *mut $t).write_unaligned(value);
                }
                Status::ok()
            }

            #[doc = concat!("Single aligned load of a `", stringify!($t), "`.")]
            pub fn $read(&self, offset: u64) -> Result<$t, Status> {
                self.check_bounds(offset, $size)?;
                Ok(unsafe { (self.ptr_at(offset) as *const $t).read_unaligned() })
            }
        }
    };
}

scalar_rw!(write_i8, read_i8, i8, 1);
scalar_rw!(write_i16, read_i16, i16, 2);
scalar_rw!(write_i32, read_i32, i32, 4);
scalar_rw!(write_i64, read_i64, i64, 8);
scalar_rw!(write_f32, read_f32, f32, 4);
scalar_rw!(write_f64, read_f64, f64, 8);

macro_rules! atomic_unsigned_ops {
    ($get_and_set:ident, $get_and_add:ident, $cas:ident, $t:ty, $size:expr, $xchg_fn:path, $xadd_fn:path, $cas_fn:path) => {
        impl View {
            pub fn $get_and_set(&self, offset: u64, value: $t) -> Result<$t, Status> {
                self.check_bounds(offset, $size)?;
                Ok(unsafe { $xchg_fn(self.ptr_at(offset) as *mut $t, value) })
            }

            pub fn $get_and_add(&self, offset: u64, value: $t) -> Result<$t, Status> {
                self.check_bounds(offset, $size)?;
                Ok(unsafe { $xadd_fn(self.ptr_at(offset) as *mut $t, value) })
            }

            /// Returns `Ok(())` on a successful swap, `Err(CMPXCHG_FAILED)`
            /// on mismatch. `CMPXCHG_FAILED` is an expected, non-fatal
            /// outcome, not a propagating I/O-style failure.
            pub fn $cas(&self, offset: u64, expect: $t, update: $t) -> Status {
                if let Err(e) = self.check_bounds(offset, $size) {
                    return e;
                }
                let swapped = unsafe { $cas_fn(self.ptr_at(offset) as *mut $t, expect, update) };
                if swapped {
                    Status::ok()
                } else {
                    Status::combine(ErrorKind::CmpxchgFailed, 0)
                }
            }
        }
    };
}

atomic_unsigned_ops!(
    get_and_set_u8,
    get_and_add_u8,
    compare_and_set_u8,
    u8,
    1,
    crate::atomics::xchg8,
    crate::atomics::xadd8,
    crate::atomics::cas8
);
atomic_unsigned_ops!(
    get_and_set_u16,
    get_and_add_u16,
    compare_and_set_u16,
    u16,
    2,
    crate::atomics::xchg16,
    crate::atomics::xadd16,
    crate::atomics::cas16
);
atomic_unsigned_ops!(
    get_and_set_u32,
    get_and_add_u32,
    compare_and_set_u32,
    u32,
    4,
    crate::atomics::xchg32,
    crate::atomics::xadd32,
    crate::atomics::cas32
);
atomic_unsigned_ops!(
    get_and_set_u64,
    get_and_add_u64,
    compare_and_set_u64,
    u64,
    8,
    crate::atomics::xchg64,
    crate::atomics::xadd64,
    crate::atomics::cas64
);

impl View {
    /// 128-bit compare-and-set. `buf` encodes `[expect_lo, expect_hi,
    /// update_lo, update_hi]` as four little-endian `u64`s packed into 32
    /// bytes. Requires a 16-byte range at `offset`.
    ///
    /// On architectures without a native double-word CAS, returns
    /// `ErrorKind::Error` rather than a misleading `CMPXCHG_FAILED`.
    pub fn compare_and_set_128(&self, offset: u64, buf: &[u8; 32]) -> Status {
        if !crate::atomics::cas128_supported() {
            return Status::combine(ErrorKind::Error, 0);
        }
        if let Err(e) = self.check_bounds(offset, 16) {
            return e;
        }
        let mut words = [0u64; 4];
        for (i, word) in words.iter_mut().enumerate() {
            *word = u64::from_le_bytes(buf[i * 8..i * 8 + 8].try_into().unwrap());
        }
        let expect = [words[0], words[1]];
        let update = [words[2], words[3]];
        let swapped = unsafe { crate::atomics::cas128(self.ptr_at(offset), expect, update) };
        if swapped {
            Status::ok()
        } else {
            Status::combine(ErrorKind::CmpxchgFailed, 0)
        }
    }
}
