//! Memory-region allocator for privileged boot/runtime firmware.
//!
//! Firmware running below the operating system has no allocator to call
//! into: it is handed one contiguous physical memory range at start-up and
//! must serve every internal allocation out of it, with no heap growth, no
//! virtual memory, and failure signaling as the only recovery path. This
//! crate provides that allocator.
//!
//! # Algorithm
//!
//! Each [`Heap`](control::Heap) controller owns one region and splits it in
//! two at initialization: a housekeeping sub-region at the front, holding a
//! fixed pool of span bookkeeping records, and the allocatable remainder,
//! seeded as a single free span. Records are threaded onto three intrusive
//! lists:
//!
//! - **spare** — records not currently describing anything
//! - **free** — free spans, kept sorted by ascending address
//! - **used** — live allocations, unordered
//!
//! Allocation is first-fit over the address-ordered free list, carving from
//! the high end of the selected span. Release looks the address up in the
//! used list and merges the span with at most one address-adjacent free
//! neighbor, inserting at the sorted position otherwise. Because records
//! only ever come from the preallocated pool, the allocator never allocates
//! memory to track memory; the price is that an allocation can fail with
//! free bytes still available once the pool is exhausted.
//!
//! All sizes are rounded up to [`ALLOC_ALIGN`] bytes and every returned
//! address is aligned to it.
//!
//! # Concurrency
//!
//! Callers are independent hardware execution contexts sharing one heap.
//! Every public operation acquires the controller's busy-wait lock for its
//! full duration. There is no reentrancy guard: re-entering the allocator
//! for the same controller from a context that already holds its lock (for
//! example from an interrupt handler) deadlocks. Interrupt-driven callers
//! must either mask reentrant interrupts across the call or use a separate
//! controller instance.

#![no_std]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod control;
pub mod global;
mod span;

/// Granularity of allocation: requested sizes are rounded up to a multiple
/// of this, and every returned address is aligned to it.
pub const ALLOC_ALIGN: usize = 64;

/// Fraction of a managed region reserved for bookkeeping records:
/// `region size / HOUSEKEEPING_FACTOR`, rounded down to [`BASE_ALIGN`].
pub const HOUSEKEEPING_FACTOR: usize = 16;

/// Required alignment of a managed region's base address and size.
pub const BASE_ALIGN: usize = 64;
