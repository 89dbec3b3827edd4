//! Boot-time firmware memory layout descriptor.
//!
//! Early firmware hands later stages a small plain-data record describing
//! where the firmware image sits in physical memory and where its writable
//! data and heap live inside that image. This crate defines that record and
//! nothing else; interpreting or validating it is the consumer's job (the
//! heap rejects descriptors it cannot build a region from).
//!
//! # Examples
//!
//! ```
//! use fw_layout::FirmwareLayout;
//!
//! let layout = FirmwareLayout {
//!     fw_start: 0x8000_0000,
//!     fw_size: 0x20_0000,
//!     fw_rw_offset: 0x8_0000,
//!     heap_offset: 0x10_0000,
//!     heap_size: 0x10_0000,
//! };
//!
//! assert_eq!(layout.heap_start(), 0x8010_0000);
//! assert_eq!(layout.heap_end(), 0x8020_0000);
//! ```

#![no_std]

use core::ops::Range;

/// Where the firmware image and its heap region live in physical memory.
///
/// All offsets are relative to `fw_start`. The descriptor carries no
/// guarantees of its own: a malformed one (zero-sized heap, heap overlapping
/// the read-only image, heap past the end of the image) is representable and
/// must be rejected by whoever consumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareLayout {
    /// Load address of the firmware image.
    pub fw_start: usize,
    /// Total size of the firmware image in bytes.
    pub fw_size: usize,
    /// Offset of the read-write section within the image.
    pub fw_rw_offset: usize,
    /// Offset of the heap region within the image.
    pub heap_offset: usize,
    /// Size of the heap region in bytes.
    pub heap_size: usize,
}

impl FirmwareLayout {
    /// Absolute start address of the heap region.
    #[must_use]
    pub const fn heap_start(&self) -> usize {
        self.fw_start + self.heap_offset
    }

    /// Absolute address one past the end of the heap region.
    #[must_use]
    pub const fn heap_end(&self) -> usize {
        self.heap_start() + self.heap_size
    }

    /// Absolute address range of the heap region.
    #[must_use]
    pub const fn heap_range(&self) -> Range<usize> {
        self.heap_start()..self.heap_end()
    }

    /// Absolute start address of the read-write section.
    #[must_use]
    pub const fn rw_start(&self) -> usize {
        self.fw_start + self.fw_rw_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT: FirmwareLayout = FirmwareLayout {
        fw_start: 0x8000_0000,
        fw_size: 0x4000,
        fw_rw_offset: 0x1000,
        heap_offset: 0x2000,
        heap_size: 0x2000,
    };

    #[test]
    fn heap_addresses_are_image_relative() {
        assert_eq!(LAYOUT.heap_start(), 0x8000_2000);
        assert_eq!(LAYOUT.heap_end(), 0x8000_4000);
        assert_eq!(LAYOUT.heap_range(), 0x8000_2000..0x8000_4000);
    }

    #[test]
    fn rw_start_is_image_relative() {
        assert_eq!(LAYOUT.rw_start(), 0x8000_1000);
    }
}
