//! The boundary contract with the CLR's Data Access Component.
//!
//! The DAC is the runtime's out-of-process structure reader: given a raw address it decodes
//! the native runtime structure there and answers with a fixed-layout record. This module
//! defines that boundary as the [`DacInterface`] trait - a set of abstract read operations
//! returning the canonical records of [`data`] - plus the [`AbiProfile`] that selects the
//! per-version decode tables at session open.
//!
//! # Architecture
//!
//! - [`DacInterface`] - one method per request the core issues; implementations translate to
//!   whatever transport actually reaches the target (a loaded `mscordacwks`, a remote
//!   debugging channel, or a test fixture)
//! - [`data`] - version-collapsed plain records, one per concept
//! - [`abi`] - the offset tables the core treats as configuration
//!
//! # Failure semantics
//!
//! Every method can fail for mundane reasons: unread pages, a half-torn-down runtime, a
//! truncated dump. The core treats such failures as "unresolvable item" and degrades - with
//! one exception, [`DacInterface::common_method_tables`], whose failure makes the whole
//! session unusable and is surfaced as [`crate::Error::Dac`].
//!
//! Enumeration-shaped requests (`method_table_list`, `stack_frames`) return finite `Vec`s
//! rather than invoking callbacks, so implementations never hold delegates across the
//! boundary.

pub mod abi;
pub mod data;

pub use abi::{AbiProfile, ClrVersion};
pub use data::{
    AppDomainData, AppDomainStoreData, CommonMethodTables, DomainLocalModuleData, EEClassData,
    FieldData, HeapDetails, MethodTableData, ModuleData, ObjectData, SegmentData, StackFrameData,
    SyncBlockData, ThreadData, ThreadPoolData, ThreadStoreData, WorkRequestData,
};

use crate::{memory::MemoryReader, Result};

/// Version-agnostic request interface to the target runtime's data access component.
///
/// The core consumes the target exclusively through this trait (plus the raw
/// reads of the [`MemoryReader`] supertrait). Implementations are expected to
/// be cheap to call repeatedly - the core caches aggressively on its side but
/// performs no batching.
///
/// Address arguments are always addresses *in the target*, never local
/// pointers. A `0` address is never a valid request target.
pub trait DacInterface: MemoryReader {
    /// Fetch the well-known method tables. Fatal on failure - the session
    /// cannot be opened without them.
    ///
    /// # Errors
    /// Returns [`crate::Error::Dac`] if the request fails.
    fn common_method_tables(&self) -> Result<CommonMethodTables>;

    /// Decode the method table at `mt`.
    ///
    /// # Errors
    /// Returns an error if the request fails; callers treat it as unresolvable.
    fn method_table_data(&self, mt: u64) -> Result<MethodTableData>;

    /// Resolve the fully qualified name of the type owning `mt`.
    ///
    /// # Errors
    /// Returns an error if the request fails; `Ok(None)` means the runtime has
    /// no name for this table.
    fn method_table_name(&self, mt: u64) -> Result<Option<String>>;

    /// Decode the EEClass behind a method table.
    ///
    /// # Errors
    /// Returns an error if the request fails; callers treat it as unresolvable.
    fn eeclass_data(&self, mt: u64) -> Result<EEClassData>;

    /// Decode one field descriptor.
    ///
    /// # Errors
    /// Returns an error if the request fails; callers treat it as unresolvable.
    fn field_data(&self, address: u64) -> Result<FieldData>;

    /// Resolve a field's name from its defining module's metadata.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    fn field_name(&self, module: u64, token: u32) -> Result<Option<String>>;

    /// Fetch a field's raw metadata signature blob.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    fn field_signature(&self, module: u64, token: u32) -> Result<Option<Vec<u8>>>;

    /// Decode per-object data (array element handles, COM wrappers).
    ///
    /// # Errors
    /// Returns an error if the request fails; callers treat it as unresolvable.
    fn object_data(&self, address: u64) -> Result<ObjectData>;

    /// Decode the module at `address`.
    ///
    /// # Errors
    /// Returns an error if the request fails; callers treat it as unresolvable.
    fn module_data(&self, address: u64) -> Result<ModuleData>;

    /// Fetch the AppDomain store roots.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    fn app_domain_store_data(&self) -> Result<AppDomainStoreData>;

    /// List all user AppDomain addresses.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    fn app_domain_list(&self) -> Result<Vec<u64>>;

    /// Decode one AppDomain.
    ///
    /// # Errors
    /// Returns an error if the request fails; callers treat it as unresolvable.
    fn app_domain_data(&self, address: u64) -> Result<AppDomainData>;

    /// List the assemblies loaded into a domain.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    fn assembly_list(&self, domain: u64) -> Result<Vec<u64>>;

    /// List the modules of an assembly.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    fn module_list(&self, assembly: u64) -> Result<Vec<u64>>;

    /// List every constructed method table of a module.
    ///
    /// This is the enumeration the whole-process type preload walks. A module
    /// for which the runtime cannot produce the list is logged and skipped by
    /// the caller, not treated as fatal.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    fn method_table_list(&self, module: u64) -> Result<Vec<u64>>;

    /// Fetch the thread store roots.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    fn thread_store_data(&self) -> Result<ThreadStoreData>;

    /// Decode one thread.
    ///
    /// # Errors
    /// Returns an error if the request fails; callers treat it as unresolvable.
    fn thread_data(&self, address: u64) -> Result<ThreadData>;

    /// Produce a bounded managed stack trace for a thread, innermost frame
    /// first.
    ///
    /// # Errors
    /// Returns an error if the request fails; the lock inspector skips the
    /// thread.
    fn stack_frames(&self, thread: u64) -> Result<Vec<StackFrameData>>;

    /// List the GC heaps (one for workstation, N for server GC).
    ///
    /// # Errors
    /// Returns an error if the request fails.
    fn heap_list(&self) -> Result<Vec<HeapDetails>>;

    /// Decode one GC segment.
    ///
    /// # Errors
    /// Returns an error if the request fails; callers stop walking the chain.
    fn segment_data(&self, address: u64) -> Result<SegmentData>;

    /// Number of entries in the syncblock table.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    fn sync_block_count(&self) -> Result<u32>;

    /// Decode syncblock table entry `index` (1-based, as the runtime counts).
    ///
    /// # Errors
    /// Returns an error if the request fails; the lock inspector skips the
    /// entry.
    fn sync_block_data(&self, index: u32) -> Result<SyncBlockData>;

    /// Locate static storage for a (domain, module id) pair. Used for types
    /// loaded domain-neutral, which key their storage by module id.
    ///
    /// # Errors
    /// Returns an error if the request fails; the static reports no address.
    fn domain_local_module(&self, domain: u64, module_id: u64) -> Result<DomainLocalModuleData>;

    /// Locate static storage directly from a module address (non-shared
    /// types).
    ///
    /// # Errors
    /// Returns an error if the request fails; the static reports no address.
    fn domain_local_module_by_module(&self, module: u64) -> Result<DomainLocalModuleData>;

    /// Compute the TLS-derived address of a thread-static field.
    ///
    /// `element_type` decides whether the GC or non-GC static block applies.
    ///
    /// # Errors
    /// Returns an error if the request fails; the field reports no address.
    fn thread_static_pointer(
        &self,
        thread: u64,
        element_type: u8,
        offset: u32,
        module_id: u64,
        shared: bool,
    ) -> Result<u64>;

    /// Fetch the thread pool counters.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    fn thread_pool_data(&self) -> Result<ThreadPoolData>;

    /// Decode one queued work request.
    ///
    /// # Errors
    /// Returns an error if the request fails; the queue walk stops.
    fn work_request_data(&self, address: u64) -> Result<WorkRequestData>;

    /// List the interface method tables a type implements (not including
    /// inherited interfaces - the registry chains the base type's list).
    ///
    /// # Errors
    /// Returns an error if the request fails; the type reports no interfaces.
    fn interface_list(&self, mt: u64) -> Result<Vec<u64>>;
}
