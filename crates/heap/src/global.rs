//! The firmware-wide default heap instance.
//!
//! Firmware holds exactly one long-lived default controller, initialized
//! once from the boot-time layout descriptor. The free functions here
//! operate on that instance; code that needs an isolated memory domain
//! constructs further [`Heap`] instances explicitly (see
//! [`create_heap`]) and passes them around by reference.

use core::ptr;

use fw_layout::FirmwareLayout;
use snafu::ensure;

use crate::BASE_ALIGN;
use crate::control::{
    Heap, HeapBeforeRwDataSnafu, HeapInitError, MisalignedRegionSnafu, OutsideImageSnafu,
    ZeroSizeSnafu,
};

/// The default controller. Inert until [`init`] hands it a region.
pub static DEFAULT_HEAP: Heap = Heap::new();

/// Validates the boot-time layout descriptor and initializes the default
/// heap over the region it describes.
///
/// # Errors
///
/// Fails without touching memory if the descriptor's heap size is zero,
/// heap offset or size is not [`BASE_ALIGN`]-aligned, the heap starts
/// before the read-write section, or the heap does not fit inside the
/// firmware image; and with the per-controller errors of
/// [`Heap::init`] otherwise.
///
/// # Safety
///
/// The descriptor must describe this firmware's actual in-memory layout,
/// and the heap region it names must be unused by anything else.
pub unsafe fn init(layout: &FirmwareLayout) -> Result<(), HeapInitError> {
    ensure!(layout.heap_size != 0, ZeroSizeSnafu);
    ensure!(
        layout.heap_size % BASE_ALIGN == 0 && layout.heap_offset % BASE_ALIGN == 0,
        MisalignedRegionSnafu
    );
    ensure!(layout.heap_offset >= layout.fw_rw_offset, HeapBeforeRwDataSnafu);
    ensure!(
        layout
            .heap_offset
            .checked_add(layout.heap_size)
            .is_some_and(|end| end <= layout.fw_size),
        OutsideImageSnafu
    );

    unsafe {
        DEFAULT_HEAP.init(
            ptr::with_exposed_provenance_mut(layout.heap_start()),
            layout.heap_size,
        )
    }
}

/// Allocates from the default heap. See [`Heap::allocate`].
#[must_use]
pub fn allocate(size: usize) -> Option<*mut u8> {
    DEFAULT_HEAP.allocate(size)
}

/// Allocates zeroed memory from the default heap. See
/// [`Heap::allocate_zeroed`].
#[must_use]
pub fn allocate_zeroed(size: usize) -> Option<*mut u8> {
    DEFAULT_HEAP.allocate_zeroed(size)
}

/// Allocates a zeroed array from the default heap. See
/// [`Heap::allocate_array`].
#[must_use]
pub fn allocate_array(count: usize, size: usize) -> Option<*mut u8> {
    DEFAULT_HEAP.allocate_array(count, size)
}

/// Releases an allocation back to the default heap. See [`Heap::release`].
pub fn release(ptr: *mut u8) {
    DEFAULT_HEAP.release(ptr);
}

/// Free bytes on the default heap.
#[must_use]
pub fn free_bytes() -> usize {
    DEFAULT_HEAP.free_bytes()
}

/// Used bytes on the default heap.
#[must_use]
pub fn used_bytes() -> usize {
    DEFAULT_HEAP.used_bytes()
}

/// Housekeeping bytes reserved by the default heap.
#[must_use]
pub fn reserved_bytes() -> usize {
    DEFAULT_HEAP.reserved_bytes()
}

/// Carves a new, uninitialized controller descriptor out of the default
/// heap. See [`Heap::create`].
#[must_use]
pub fn create_heap() -> Option<&'static Heap> {
    Heap::create(&DEFAULT_HEAP)
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    extern crate alloc;

    use core::alloc::Layout;

    use super::*;

    // Everything in one test: the default heap is process-global, so its
    // lifecycle has to be exercised in a single sequence.
    #[test]
    fn default_heap_lifecycle() {
        let image_size = 16 * 1024;
        let heap_offset = 8 * 1024;
        let heap_size = 8 * 1024;
        let layout = Layout::from_size_align(image_size, BASE_ALIGN).unwrap();

        unsafe {
            let image = alloc::alloc::alloc(layout);
            let valid = FirmwareLayout {
                fw_start: image.expose_provenance(),
                fw_size: image_size,
                fw_rw_offset: 4 * 1024,
                heap_offset,
                heap_size,
            };

            // Uninitialized default heap is inert.
            assert_eq!(allocate(64), None);
            assert_eq!(free_bytes(), 0);

            // Malformed descriptors are rejected before any memory is
            // touched.
            let err = init(&FirmwareLayout { heap_size: 0, ..valid }).unwrap_err();
            assert!(matches!(err, HeapInitError::ZeroSize { .. }));

            let err = init(&FirmwareLayout {
                heap_size: heap_size + 32,
                ..valid
            })
            .unwrap_err();
            assert!(matches!(err, HeapInitError::MisalignedRegion { .. }));

            let err = init(&FirmwareLayout {
                fw_rw_offset: heap_offset + BASE_ALIGN,
                ..valid
            })
            .unwrap_err();
            assert!(matches!(err, HeapInitError::HeapBeforeRwData { .. }));

            let err = init(&FirmwareLayout {
                heap_size: heap_size + BASE_ALIGN,
                ..valid
            })
            .unwrap_err();
            assert!(matches!(err, HeapInitError::OutsideImage { .. }));

            // A well-formed descriptor initializes the default heap.
            init(&valid).unwrap();
            assert_eq!(reserved_bytes(), heap_size / 16);
            assert_eq!(free_bytes(), heap_size - heap_size / 16);

            let err = init(&valid).unwrap_err();
            assert!(matches!(err, HeapInitError::AlreadyInitialized { .. }));

            let ptr = allocate_zeroed(100).unwrap();
            assert_eq!(ptr.addr() % crate::ALLOC_ALIGN, 0);
            assert_eq!(used_bytes(), 128);
            release(ptr);
            assert_eq!(used_bytes(), 0);
            assert_eq!(
                free_bytes() + used_bytes() + reserved_bytes(),
                heap_size
            );

            let secondary = create_heap().unwrap();
            assert_eq!(secondary.allocate(64), None);

            // The image intentionally leaks: the default heap references it
            // for the rest of the process.
        }
    }
}
