#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]

//! # clrscope
//!
//! A library for reconstructing CLR runtime state - types, objects, threads, locks,
//! AppDomains, GC heap layout - from a memory image of a stopped .NET process. The image can
//! be a suspended live process, a minidump, or a full dump; `clrscope` consumes it through
//! two narrow traits and rebuilds the managed world on this side of the boundary.
//!
//! ## Features
//!
//! - **Type registry** - resolve raw method tables into shared, deduplicated type records
//!   with lazy base types, element kinds, fields, interfaces, and GC descriptors
//! - **Object model** - type any heap address, compute object sizes, decode strings and
//!   exceptions, walk every object segment by segment
//! - **Field resolution** - instance, static, and thread-static fields with correct
//!   addressing per target bitness, initialization gating, and a metadata-signature
//!   fallback for types the target never loaded
//! - **Lock inspection** - triangulate monitors, reader-writer locks, joins, and waits
//!   from the heap, the syncblock table, and thread stacks into one blocked-object graph
//! - **Revision safety** - every resolved record is stamped; after a [`crate::runtime::ClrRuntime::flush`]
//!   stale handles fail loudly instead of lying
//!
//! ## Architecture
//!
//! ```text
//! ClrRuntime ── revision counter, flush, cached views
//!   ├── ClrHeap ── type arena, object model, string/exception decoding
//!   │     ├── ClrType / TypeKind ── resolved records
//!   │     ├── fields ── instance / static / thread-static resolution
//!   │     └── GcDesc ── GC tracing descriptor walks
//!   ├── DomainSet ── AppDomains, assemblies, modules
//!   ├── threads ── managed thread list
//!   └── LockInspection ── three-pass blocking-object triangulation
//!         ▲
//!         └── DacInterface + MemoryReader ── the only way in or out
//! ```
//!
//! The [`crate::dac::DacInterface`] trait is the boundary with the runtime's data access
//! component; [`crate::memory::MemoryReader`] is raw address-space access. Everything else
//! is deterministic decoding.
//!
//! ## Usage Examples
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use clrscope::{AbiProfile, ClrRuntime, ClrVersion, PointerWidth};
//!
//! let dac = Arc::new(my_dac_transport()?);
//! let runtime = ClrRuntime::new(dac, AbiProfile::new(ClrVersion::V45, PointerWidth::Bits64))?;
//!
//! let heap = runtime.heap()?;
//! for ty in heap.enumerate_types()? {
//!     println!("{:#x} {}", ty.method_table(), ty.name());
//! }
//!
//! for lock in runtime.blocking_objects()?.objects() {
//!     if lock.has_waiters() {
//!         println!("{:#x} blocked: {:?}", lock.object, lock.reason);
//!     }
//! }
//! ```
//!
//! ## Threading
//!
//! A session is built for one consuming thread. Shared records are handed out as `Arc`s and
//! the internal caches use concurrent containers, but no cross-thread ordering of
//! resolutions is promised.

#[macro_use]
mod macros;
#[macro_use]
mod error;

pub mod dac;
pub mod heap;
pub mod lock;
pub mod memory;
mod parser;
pub mod runtime;
mod token;

#[cfg(test)]
pub(crate) mod test;

pub use error::Error;
pub use parser::Parser;
pub use token::Token;

pub use dac::{AbiProfile, ClrVersion, DacInterface};
pub use heap::{
    ClrElementType, ClrHeap, ClrType, ClrValue, GcDesc, HeapObject, TypeFields, TypeHandle,
    TypeIndex, TypeKind,
};
pub use lock::{BlockedReason, BlockingObject, LockInspection, LockSnapshot};
pub use memory::{MemoryReader, PointerWidth, SnapshotMemory};
pub use runtime::{AppDomain, ClrModule, ClrRuntime, ClrThread, ClrThreadPool, ThreadState};

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
