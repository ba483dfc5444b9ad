//! Canonical data records returned by the DAC request layer.
//!
//! The CLR's data access component answers each request with a fixed-layout native struct
//! whose exact shape varies by runtime version and bitness. Rather than mirroring every
//! version-specific overlay as its own Rust type, this module defines exactly one record per
//! concept; the request layer decodes whatever the target actually returned into these using
//! the offset tables selected by the session's [`crate::dac::AbiProfile`].
//!
//! All records are plain data: no back-references, no lifetimes, no laziness. The type
//! registry and its consumers own all caching.

/// The well-known method tables the runtime publishes for bootstrapping.
///
/// Without these the session is unusable: array and string decoding, free-space
/// detection, and exception decoding all key off them. Fetching this record is
/// the one DAC request whose failure is fatal.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommonMethodTables {
    /// `System.Object[]` method table; arrays share it, element types live in a side slot
    pub array: u64,
    /// `System.String` method table
    pub string: u64,
    /// `System.Object` method table
    pub object: u64,
    /// `System.Exception` method table
    pub exception: u64,
    /// The "Free" marker pseudo-type used for dead space on the GC heap
    pub free: u64,
}

/// Raw method table description.
#[derive(Debug, Clone, Copy, Default)]
pub struct MethodTableData {
    /// `true` for the Free pseudo-type marking unallocated heap space
    pub free: bool,
    /// Fixed instance size in bytes (including the object header allowance)
    pub base_size: u64,
    /// Array element stride; 0 for non-array types
    pub component_size: u32,
    /// Whether instances contain GC references (a GC descriptor precedes the table)
    pub contains_pointers: bool,
    /// EEClass address carrying field layout and the metadata token
    pub eeclass: u64,
    /// Parent method table address (0 for `System.Object` and interfaces)
    pub parent: u64,
    /// Declared method count
    pub num_methods: u32,
    /// Whether the type is loaded domain-neutral (shared across AppDomains)
    pub shared: bool,
}

/// EEClass-level description: field counts and metadata identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct EEClassData {
    /// Owning module address
    pub module: u64,
    /// Metadata token of the type definition
    pub token: u32,
    /// Address of the first field descriptor in the linked field list
    pub first_field: u64,
    /// Number of instance fields (including inherited slots counted by the runtime)
    pub num_instance_fields: u32,
    /// Number of static fields
    pub num_static_fields: u32,
    /// Number of thread-static fields
    pub num_thread_static_fields: u32,
}

/// Raw field descriptor.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldData {
    /// CorElementType byte of the field's declared type
    pub element_type: u8,
    /// Method table of the field's type; 0 when the type has not been loaded yet
    pub type_method_table: u64,
    /// Module owning the field definition
    pub module: u64,
    /// Metadata token of the field definition
    pub token: u32,
    /// Offset of the field within the instance (or static block)
    pub offset: u32,
    /// Thread-local static field
    pub is_thread_local: bool,
    /// Static field
    pub is_static: bool,
    /// Address of the next field descriptor; 0 terminates the list
    pub next_field: u64,
}

/// Per-object data beyond what the method table describes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectData {
    /// CorElementType of the object (for arrays: of the array itself)
    pub element_type: u8,
    /// For arrays, the element type's method table ("element type handle")
    pub element_type_handle: u64,
    /// For arrays, the address of the first element
    pub data_pointer: u64,
    /// Runtime-callable wrapper address, if the object is a COM interop proxy.
    /// `None` before v4.5 - callers must treat COM data as optional.
    pub rcw: Option<u64>,
    /// COM-callable wrapper address, same caveat as `rcw`
    pub ccw: Option<u64>,
}

/// Module description.
#[derive(Debug, Clone, Default)]
pub struct ModuleData {
    /// Module address (identity within one revision)
    pub address: u64,
    /// Runtime-assigned module id, used for domain-local static storage lookup
    pub id: u64,
    /// Owning assembly address
    pub assembly: u64,
    /// File name or reflection name, when resolvable
    pub name: Option<String>,
    /// Reflection-emit module; such modules have no stable metadata tokens
    pub is_dynamic: bool,
    /// Whether the module is backed by a PE file on disk
    pub is_pe_file: bool,
    /// In-image metadata start address
    pub metadata_start: u64,
    /// In-image metadata length
    pub metadata_length: u64,
}

/// AppDomain store: the roots of domain enumeration.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppDomainStoreData {
    /// System domain address
    pub system_domain: u64,
    /// Shared domain address (domain-neutral assemblies)
    pub shared_domain: u64,
    /// Number of user AppDomains
    pub domain_count: u32,
}

/// AppDomain description.
#[derive(Debug, Clone, Default)]
pub struct AppDomainData {
    /// Domain address
    pub address: u64,
    /// Runtime-assigned domain id
    pub id: u32,
    /// Friendly name, when resolvable
    pub name: Option<String>,
}

/// Thread store: the root of thread enumeration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadStoreData {
    /// First thread in the runtime's intrusive thread list
    pub first_thread: u64,
    /// Number of managed threads
    pub thread_count: u32,
}

/// Managed thread description.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadData {
    /// Thread object address
    pub address: u64,
    /// Next thread in the intrusive list; 0 terminates
    pub next: u64,
    /// OS thread id
    pub os_thread_id: u32,
    /// Managed thread id (what lock records store)
    pub managed_thread_id: u32,
    /// Current AppDomain address
    pub domain: u64,
    /// Number of locks the thread currently holds, as tracked by the runtime
    pub lock_count: u32,
    /// TEB address (0 on non-Windows targets)
    pub teb: u64,
    /// Stack base (highest address)
    pub stack_base: u64,
    /// Stack limit (lowest address)
    pub stack_limit: u64,
    /// Raw thread state bits
    pub state: u32,
    /// Address of the first GC-handle allocation context, when known
    pub alloc_context_ptr: u64,
}

/// One frame of a managed stack trace.
#[derive(Debug, Clone, Default)]
pub struct StackFrameData {
    /// Stack pointer at this frame
    pub stack_pointer: u64,
    /// Instruction pointer at this frame
    pub instruction_pointer: u64,
    /// Fully qualified `Namespace.Type.Method` name, when resolvable
    pub method_name: Option<String>,
}

/// One GC heap (workstation: the only one; server: one of N).
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapDetails {
    /// Heap address (0 for the single workstation heap)
    pub address: u64,
    /// First segment of the small-object chain
    pub first_segment: u64,
    /// First segment of the large-object chain
    pub first_large_segment: u64,
    /// The ephemeral segment (contains gen0/gen1)
    pub ephemeral_segment: u64,
    /// Current allocation pointer within the ephemeral segment
    pub ephemeral_allocated: u64,
    /// Generation 0 start address
    pub gen0_start: u64,
    /// Generation 1 start address
    pub gen1_start: u64,
    /// Generation 2 start address
    pub gen2_start: u64,
}

/// One GC segment.
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentData {
    /// Segment address
    pub address: u64,
    /// First object address
    pub start: u64,
    /// End of allocated objects
    pub allocated: u64,
    /// End of committed memory
    pub committed: u64,
    /// Next segment in the chain; 0 terminates
    pub next: u64,
}

/// One syncblock table entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncBlockData {
    /// Address of the object this syncblock protects
    pub object: u64,
    /// Address of the syncblock record itself (stack slots may point at either)
    pub sync_block_pointer: u64,
    /// Free table slot - skip
    pub free: bool,
    /// Nonzero when the monitor is held (counts owner + waiters)
    pub monitor_held: u32,
    /// Monitor recursion count
    pub recursion: u32,
    /// Owning thread address, 0 if unowned
    pub holding_thread: u64,
    /// Additional threads interacting with this syncblock
    pub additional_thread_count: u32,
}

/// Domain-local module storage: where statics live for one (module, domain) pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct DomainLocalModuleData {
    /// Per-class initialization flags blob, indexed by type token row
    pub class_data: u64,
    /// Base of the non-GC (primitive) static storage block
    pub non_gc_static_data_start: u64,
    /// Base of the GC (reference/value-class) static storage block
    pub gc_static_data_start: u64,
}

/// Thread pool counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPoolData {
    /// Last sampled CPU utilization (percent)
    pub cpu_utilization: u32,
    /// Worker thread floor
    pub min_threads: u32,
    /// Worker thread ceiling
    pub max_threads: u32,
    /// Idle worker threads
    pub num_idle_workers: u32,
    /// Running worker threads
    pub num_working_workers: u32,
    /// Retired worker threads
    pub num_retired_workers: u32,
    /// Completion port thread floor
    pub min_completion_ports: u32,
    /// Completion port thread ceiling
    pub max_completion_ports: u32,
    /// Free completion port threads
    pub num_free_completion_ports: u32,
    /// Head of the queued work request list; 0 when empty
    pub first_work_request: u64,
}

/// One queued thread-pool work request.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkRequestData {
    /// Function pointer to invoke
    pub function: u64,
    /// Context argument
    pub context: u64,
    /// Next request; 0 terminates
    pub next: u64,
}
