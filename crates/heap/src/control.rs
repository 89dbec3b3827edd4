//! Region controller: initialization, carve/coalesce algorithms, queries.
//!
//! A [`Heap`] owns one contiguous memory range. The front of the range is
//! reserved as a housekeeping sub-region holding the fixed record pool; the
//! remainder is handed out in [`ALLOC_ALIGN`]-byte granules. One busy-wait
//! lock serializes every operation on the controller.
//!
//! # Usage Example
//!
//! ```rust
//! use heap::control::Heap;
//!
//! #[repr(align(64))]
//! struct Region([u8; 4096]);
//!
//! let heap = Heap::new();
//!
//! // Hand the controller memory (in firmware this is a physical range).
//! let region = Box::leak(Box::new(Region([0; 4096])));
//! unsafe {
//!     heap.init(region.0.as_mut_ptr(), region.0.len()).unwrap();
//! }
//!
//! if let Some(ptr) = heap.allocate(100) {
//!     // Use the 128 usable bytes...
//!     heap.release(ptr);
//! }
//! ```

use core::ops::Range;
use core::ptr;

use arrayvec::ArrayVec;
use snafu::{Location, Snafu, ensure};
use spin::Mutex;

use crate::span::{RecordList, RecordPool, SpanRecord};
use crate::{ALLOC_ALIGN, BASE_ALIGN, HOUSEKEEPING_FACTOR};

const _: () = assert!(ALLOC_ALIGN.is_power_of_two());
const _: () = assert!(BASE_ALIGN.is_power_of_two());
const _: () = assert!(align_of::<Heap>() <= ALLOC_ALIGN);

/// Errors from controller or default-heap initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum HeapInitError {
    /// The region (or descriptor heap size) is zero bytes long.
    #[snafu(display("heap region size is zero"))]
    ZeroSize {
        #[snafu(implicit)]
        location: Location,
    },
    /// Base address or size is not a multiple of [`BASE_ALIGN`].
    #[snafu(display("heap region base or size is not {BASE_ALIGN}-byte aligned"))]
    MisalignedRegion {
        #[snafu(implicit)]
        location: Location,
    },
    /// The housekeeping sub-region cannot hold a single bookkeeping record.
    #[snafu(display("heap region cannot hold any bookkeeping records"))]
    RegionTooSmall {
        #[snafu(implicit)]
        location: Location,
    },
    /// The controller already manages a region.
    #[snafu(display("heap controller is already initialized"))]
    AlreadyInitialized {
        #[snafu(implicit)]
        location: Location,
    },
    /// The descriptor places the heap before the read-write section.
    #[snafu(display("heap region starts before the read-write section"))]
    HeapBeforeRwData {
        #[snafu(implicit)]
        location: Location,
    },
    /// The descriptor places the heap past the end of the firmware image.
    #[snafu(display("heap region does not fit inside the firmware image"))]
    OutsideImage {
        #[snafu(implicit)]
        location: Location,
    },
}

#[derive(Debug)]
struct HeapState {
    base: *mut u8,
    size: usize,
    // The housekeeping sub-region sits at `base`, so only its size needs
    // tracking.
    hksize: usize,
    pool: RecordPool,
    spare: RecordList,
    free: RecordList,
    used: RecordList,
}

// The state exclusively owns the managed region handed to `Heap::init`.
unsafe impl Send for HeapState {}

impl HeapState {
    const fn empty() -> Self {
        Self {
            base: ptr::null_mut(),
            size: 0,
            hksize: 0,
            pool: RecordPool::empty(),
            spare: RecordList::new(),
            free: RecordList::new(),
            used: RecordList::new(),
        }
    }

    fn is_initialized(&self) -> bool {
        self.size != 0
    }

    /// First-fit scan over the address-ordered free list; carves from the
    /// high end of the selected span. `size` is already rounded.
    fn carve(&mut self, size: usize) -> Option<usize> {
        let mut selected = None;
        let mut cursor = self.free.head();
        while let Some(index) = cursor {
            if size <= self.pool.get(index).size {
                selected = Some(index);
                break;
            }
            cursor = self.free.next(&self.pool, index);
        }
        let selected = selected?;

        if self.pool.get(selected).size == size {
            self.free.remove(&mut self.pool, selected);
            self.used.push_tail(&mut self.pool, selected);
            return Some(self.pool.get(selected).addr);
        }

        // Partial fit: the shrinking span keeps its record and address, the
        // allocation gets a spare record. No spare record, no allocation.
        let record = self.spare.pop_head(&mut self.pool)?;
        let addr = {
            let span = self.pool.get_mut(selected);
            span.size -= size;
            span.addr + span.size
        };
        {
            let allocation = self.pool.get_mut(record);
            allocation.addr = addr;
            allocation.size = size;
        }
        self.used.push_tail(&mut self.pool, record);
        Some(addr)
    }

    /// Releases the used span containing `addr`, merging with at most one
    /// address-adjacent free neighbor. Unknown addresses are ignored.
    fn release(&mut self, addr: usize) {
        let mut found = None;
        let mut cursor = self.used.head();
        while let Some(index) = cursor {
            let record = self.pool.get(index);
            if record.addr <= addr && addr < record.addr + record.size {
                found = Some(index);
                break;
            }
            cursor = self.used.next(&self.pool, index);
        }
        let Some(freed) = found else { return };
        self.used.remove(&mut self.pool, freed);

        let (freed_addr, freed_size) = {
            let record = self.pool.get(freed);
            (record.addr, record.size)
        };

        let mut cursor = self.free.head();
        while let Some(index) = cursor {
            let (span_addr, span_size) = {
                let record = self.pool.get(index);
                (record.addr, record.size)
            };
            if freed_addr + freed_size == span_addr {
                let span = self.pool.get_mut(index);
                span.addr = freed_addr;
                span.size += freed_size;
                self.retire(freed);
                return;
            }
            if span_addr + span_size == freed_addr {
                self.pool.get_mut(index).size += freed_size;
                self.retire(freed);
                return;
            }
            if span_addr + span_size > freed_addr {
                // Sorted insertion point; the freed record keeps describing
                // the span, now as a free-list node.
                self.free.insert_before(&mut self.pool, index, freed);
                return;
            }
            cursor = self.free.next(&self.pool, index);
        }
        self.free.push_tail(&mut self.pool, freed);
    }

    /// Returns a record to the spare pool.
    fn retire(&mut self, index: usize) {
        {
            let record = self.pool.get_mut(index);
            record.addr = 0;
            record.size = 0;
        }
        self.spare.push_tail(&mut self.pool, index);
    }

    fn free_bytes(&self) -> usize {
        let mut total = 0;
        let mut cursor = self.free.head();
        while let Some(index) = cursor {
            total += self.pool.get(index).size;
            cursor = self.free.next(&self.pool, index);
        }
        total
    }

    fn ptr_for(&self, addr: usize) -> *mut u8 {
        self.base.with_addr(addr)
    }
}

/// One independently locked allocator over one contiguous memory range.
///
/// A freshly constructed controller manages nothing: queries report zero
/// and allocation fails until [`init`](Self::init) hands it a region.
/// Controllers are never torn down; firmware constructs one default
/// instance (see [`global`](crate::global)) plus any number of independent
/// instances for isolated memory domains.
///
/// Every operation holds the controller's busy-wait lock for its full
/// duration. Re-entering the allocator for the same controller from a
/// context that already holds the lock deadlocks; see the crate-level
/// documentation.
#[derive(Debug)]
pub struct Heap {
    state: Mutex<HeapState>,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    /// Creates an empty, uninitialized controller.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(HeapState::empty()),
        }
    }

    /// Builds the controller over the region `base..base + size`.
    ///
    /// The front `size / HOUSEKEEPING_FACTOR` bytes (rounded down to
    /// [`BASE_ALIGN`]) become the housekeeping sub-region; one bookkeeping
    /// record is stamped per record-sized slot in it, and the remainder of
    /// the region is seeded as a single free span.
    ///
    /// # Errors
    ///
    /// Fails without touching the region if the size is zero, base or size
    /// is misaligned, the housekeeping sub-region cannot hold a single
    /// record, or the controller is already initialized.
    ///
    /// # Safety
    ///
    /// `base..base + size` must be valid, writable memory, exclusively
    /// owned by this controller from here on, and valid for the remaining
    /// lifetime of the firmware.
    pub unsafe fn init(&self, base: *mut u8, size: usize) -> Result<(), HeapInitError> {
        let mut state = self.state.lock();
        ensure!(!state.is_initialized(), AlreadyInitializedSnafu);
        ensure!(!base.is_null() && size != 0, ZeroSizeSnafu);
        ensure!(
            base.addr() % BASE_ALIGN == 0 && size % BASE_ALIGN == 0,
            MisalignedRegionSnafu
        );

        let hksize = (size / HOUSEKEEPING_FACTOR) & !(BASE_ALIGN - 1);
        ensure!(hksize >= size_of::<SpanRecord>(), RegionTooSmallSnafu);

        let mut pool = unsafe { RecordPool::stamp(base, hksize) };
        let mut spare = RecordList::new();
        for index in 0..pool.capacity() {
            spare.push_tail(&mut pool, index);
        }

        let mut free = RecordList::new();
        let Some(first) = spare.pop_head(&mut pool) else {
            return RegionTooSmallSnafu.fail();
        };
        {
            let span = pool.get_mut(first);
            span.addr = base.addr() + hksize;
            span.size = size - hksize;
        }
        free.push_tail(&mut pool, first);

        *state = HeapState {
            base,
            size,
            hksize,
            pool,
            spare,
            free,
            used: RecordList::new(),
        };
        Ok(())
    }

    /// Allocates at least `size` bytes, rounded up to [`ALLOC_ALIGN`].
    ///
    /// Returns a pointer aligned to [`ALLOC_ALIGN`], exclusively owned by
    /// the caller until [`release`](Self::release)d, or `None` if the
    /// request is zero bytes, no free span is large enough, or the spare
    /// record pool is exhausted.
    #[must_use]
    pub fn allocate(&self, size: usize) -> Option<*mut u8> {
        let size = round_request(size)?;
        self.allocate_rounded(size)
    }

    /// Like [`allocate`](Self::allocate), but zeroes the returned region
    /// (all of it, including the rounding slack).
    #[must_use]
    pub fn allocate_zeroed(&self, size: usize) -> Option<*mut u8> {
        let size = round_request(size)?;
        let ptr = self.allocate_rounded(size)?;
        unsafe {
            ptr.write_bytes(0, size);
        }
        Some(ptr)
    }

    /// Allocates a zeroed region for `count` items of `size` bytes each.
    ///
    /// Fails if `count * size` overflows, in addition to the usual
    /// allocation failure modes.
    #[must_use]
    pub fn allocate_array(&self, count: usize, size: usize) -> Option<*mut u8> {
        let total = count.checked_mul(size)?;
        self.allocate_zeroed(total)
    }

    fn allocate_rounded(&self, size: usize) -> Option<*mut u8> {
        let mut state = self.state.lock();
        let addr = state.carve(size)?;
        Some(state.ptr_for(addr))
    }

    /// Releases the allocation containing `ptr`.
    ///
    /// A null pointer, or an address this controller does not currently
    /// track as used, is a no-op: the firmware cannot distinguish "already
    /// freed" from "never allocated" and treats neither as an error.
    pub fn release(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        self.state.lock().release(ptr.addr());
    }

    /// Total bytes currently on the free list.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        self.state.lock().free_bytes()
    }

    /// Total bytes currently handed out to callers.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        let state = self.state.lock();
        state.size - state.hksize - state.free_bytes()
    }

    /// Bytes reserved for the housekeeping sub-region, fixed at
    /// initialization.
    #[must_use]
    pub fn reserved_bytes(&self) -> usize {
        self.state.lock().hksize
    }

    /// Number of spans currently on the free list.
    #[must_use]
    pub fn free_span_count(&self) -> usize {
        let state = self.state.lock();
        state.free.count(&state.pool)
    }

    /// Snapshot of the free list in ascending address order, truncated to
    /// the first `N` spans.
    #[must_use]
    pub fn free_ranges<const N: usize>(&self) -> ArrayVec<Range<usize>, N> {
        let state = self.state.lock();
        let mut ranges = ArrayVec::new();
        let mut cursor = state.free.head();
        while let Some(index) = cursor {
            let record = state.pool.get(index);
            if ranges
                .try_push(record.addr..record.addr + record.size)
                .is_err()
            {
                break;
            }
            cursor = state.free.next(&state.pool, index);
        }
        ranges
    }

    /// Carves a new, uninitialized controller descriptor out of `parent`.
    ///
    /// The descriptor itself must come from an already-initialized heap,
    /// typically the default one. It is reserved permanently: controllers
    /// are never destroyed, so the parent never gets these bytes back.
    /// Returns `None` if `parent` cannot satisfy the allocation.
    #[must_use]
    pub fn create(parent: &Self) -> Option<&'static Self> {
        let descriptor = parent.allocate_zeroed(size_of::<Self>())?.cast::<Self>();
        unsafe {
            descriptor.write(Self::new());
            Some(&*descriptor)
        }
    }
}

/// Rounds a requested size up to the allocation granularity; zero-byte
/// requests are failures, not empty allocations.
fn round_request(size: usize) -> Option<usize> {
    if size == 0 {
        return None;
    }
    size.checked_next_multiple_of(ALLOC_ALIGN)
}
