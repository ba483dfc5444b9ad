//! ABI profile: version- and bitness-dependent layout constants.
//!
//! A handful of object layouts the core must decode by hand (string payloads, exception
//! fields, reader-writer lock internals, stack trace arrays) shift between CLR major versions
//! and between 32- and 64-bit targets. Those offsets are configuration, not logic: they live
//! in one table here, selected once at session open, and nothing downstream bakes a literal
//! into its decoding path.
//!
//! # Usage Examples
//!
//! ```rust
//! use clrscope::dac::{AbiProfile, ClrVersion};
//! use clrscope::memory::PointerWidth;
//!
//! let abi = AbiProfile::new(ClrVersion::V45, PointerWidth::Bits64);
//! assert_eq!(abi.pointer_size(), 8);
//! // v4+ strings store their length right after the method table word.
//! assert_eq!(abi.string_length_offset(), 8);
//! ```

use crate::memory::PointerWidth;

/// Major CLR runtime versions with distinct data-structure layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClrVersion {
    /// Desktop CLR 2.0 (also hosts 3.0/3.5 assemblies)
    V2,
    /// Desktop CLR 4.0 up to 4.0.x
    V4,
    /// Desktop CLR 4.5 and later in-place updates
    V45,
}

impl ClrVersion {
    /// Whether this runtime exposes COM interop data (RCW/CCW) through the DAC.
    ///
    /// Pre-4.5 runtimes do not; callers get `None` instead of an error.
    #[must_use]
    pub fn has_com_data(self) -> bool {
        matches!(self, ClrVersion::V45)
    }
}

/// The decode-table selection for one session: runtime version plus bitness.
///
/// Constructed once when the session opens and copied freely (it is two enums
/// and derived integers). Every hand-decoded layout in the core routes its
/// offsets through this type.
#[derive(Debug, Clone, Copy)]
pub struct AbiProfile {
    version: ClrVersion,
    pointer_width: PointerWidth,
}

impl AbiProfile {
    /// Create a profile for the given runtime version and target bitness.
    #[must_use]
    pub fn new(version: ClrVersion, pointer_width: PointerWidth) -> Self {
        AbiProfile {
            version,
            pointer_width,
        }
    }

    /// The runtime version this profile decodes.
    #[must_use]
    pub fn version(&self) -> ClrVersion {
        self.version
    }

    /// Target pointer width.
    #[must_use]
    pub fn pointer_width(&self) -> PointerWidth {
        self.pointer_width
    }

    /// Pointer size in bytes.
    #[must_use]
    pub fn pointer_size(&self) -> u64 {
        self.pointer_width.size()
    }

    /// Offset of a string's length field from the object address.
    ///
    /// v2 strings carry an extra array-length word before the string length;
    /// v4 dropped it.
    #[must_use]
    pub fn string_length_offset(&self) -> u64 {
        let ptr = self.pointer_size();
        match self.version {
            ClrVersion::V2 => ptr + 4,
            ClrVersion::V4 | ClrVersion::V45 => ptr,
        }
    }

    /// Offset of a string's first UTF-16 code unit from the object address.
    #[must_use]
    pub fn string_first_char_offset(&self) -> u64 {
        let ptr = self.pointer_size();
        match self.version {
            ClrVersion::V2 => ptr + 8,
            ClrVersion::V4 | ClrVersion::V45 => ptr + 4,
        }
    }

    /// Offset of `System.Exception`'s `_message` reference field.
    #[must_use]
    pub fn exception_message_offset(&self) -> u64 {
        // _className precedes _message in every desktop layout.
        2 * self.pointer_size()
    }

    /// Offset of `System.Exception`'s `_HResult` field.
    #[must_use]
    pub fn exception_hresult_offset(&self) -> u64 {
        match (self.version, self.pointer_width) {
            (ClrVersion::V2, PointerWidth::Bits32) => 0x34,
            (ClrVersion::V4, PointerWidth::Bits32) => 0x38,
            (ClrVersion::V45, PointerWidth::Bits32) => 0x3C,
            (ClrVersion::V2, PointerWidth::Bits64) => 0x74,
            (ClrVersion::V4, PointerWidth::Bits64) => 0x84,
            (ClrVersion::V45, PointerWidth::Bits64) => 0x8C,
        }
    }

    /// Offset of `ReaderWriterLock`'s internal data block pointer.
    #[must_use]
    pub fn rwlock_data_offset(&self) -> u64 {
        match self.pointer_width {
            PointerWidth::Bits32 => 0x08,
            PointerWidth::Bits64 => 0x10,
        }
    }

    /// Element stride of the runtime's internal stack-trace arrays.
    #[must_use]
    pub fn stack_trace_element_stride(&self) -> u64 {
        match (self.version, self.pointer_width) {
            (ClrVersion::V2, PointerWidth::Bits32) => 0x1C,
            (_, PointerWidth::Bits32) => 0x10,
            (ClrVersion::V2, PointerWidth::Bits64) => 0x30,
            (_, PointerWidth::Bits64) => 0x18,
        }
    }

    /// Minimum size of any heap object: header word, method table word, and
    /// one payload word.
    #[must_use]
    pub fn min_object_size(&self) -> u64 {
        3 * self.pointer_size()
    }
}
