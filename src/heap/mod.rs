//! GC heap reconstruction: the type registry and object model.
//!
//! [`ClrHeap`] is the center of the crate. It owns the append-only arena of resolved
//! [`ClrType`] records, the caches that make repeated resolution cheap, the GC segment
//! map, and the hand-decoders for strings and exceptions. Everything it knows comes
//! from [`crate::dac::DacInterface`] requests plus raw reads; everything it produces is
//! stamped with the session revision and refuses to answer once the runtime has been
//! flushed.
//!
//! # Architecture
//!
//! - **Type arena** - resolved types live in an append-only vector and are referred to
//!   by [`TypeIndex`]; the handle map and the `(module, token)` identity map both point
//!   into it. Records are never mutated after insertion; their lazy cells are filled
//!   through accessors on the heap.
//! - **Resolution** - [`ClrHeap::heap_type`] implements the full lookup: fast path by
//!   handle, array aliasing for unknown components, identity collapse for shared
//!   generic instantiations, and record construction. Any DAC failure along the way
//!   makes the whole resolution answer `None`.
//! - **Object model** - [`ClrHeap::object_type`] reads an object's method table word,
//!   [`ClrHeap::object_size`] computes its extent, [`ClrHeap::enumerate_objects`] walks
//!   the segment map object by object.
//!
//! # Threading
//!
//! The heap is built for a single consuming thread. The concurrent map types it uses
//! keep interior mutation simple, not to promise cross-thread linearization; index
//! assignment in particular assumes resolutions do not race.
//!
//! # Usage Examples
//!
//! ```rust,ignore
//! let heap = runtime.heap()?;
//! for obj in heap.enumerate_objects() {
//!     println!("{:#x} {}", obj.address, obj.ty.name());
//! }
//! ```

pub mod fields;
pub mod gcdesc;
pub mod types;

pub use fields::{ClrValue, FieldCore, InstanceField, StaticField, ThreadStaticField, TypeFields};
pub use gcdesc::GcDesc;
pub use types::{ArrayInfo, ClrElementType, ClrType, TypeHandle, TypeIndex, TypeKind};

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex, OnceLock,
    },
};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::{
    dac::{CommonMethodTables, DacInterface, EEClassData, MethodTableData, ModuleData},
    dac::AbiProfile,
    heap::types::{primitive_from_name, UNKNOWN_TYPE_NAME},
    lock::{LockInspection, LockSnapshot},
    memory::MemoryReader,
    runtime::threads::ClrThread,
    token::{Token, INVALID_TOKEN},
    Error, Result,
};

/// Upper bound on base-chain walks during element-kind inference.
const BASE_CHAIN_LIMIT: usize = 32;
/// Upper bound on GC descriptor series entries.
const MAX_GCDESC_SERIES: i64 = 4096;
/// Upper bound on decoded string length, in UTF-16 units.
const MAX_STRING_CHARS: u32 = 1 << 20;
/// Upper bound on segments per chain; a longer chain is treated as cyclic.
const MAX_SEGMENTS: usize = 1024;

/// One GC heap (the only one under workstation GC, one of N under server GC).
#[derive(Debug, Clone)]
pub struct SubHeap {
    /// Heap address; 0 for the single workstation heap
    pub address: u64,
    /// Segments of this heap, small-object chain first
    pub segments: Vec<ClrSegment>,
    /// Generation 0 start address
    pub gen0_start: u64,
    /// Generation 1 start address
    pub gen1_start: u64,
    /// Generation 2 start address
    pub gen2_start: u64,
}

/// One GC segment with its object extent resolved.
#[derive(Debug, Clone, Copy)]
pub struct ClrSegment {
    /// Segment record address
    pub address: u64,
    /// First object address
    pub start: u64,
    /// End of live objects (the ephemeral segment uses the current
    /// allocation pointer, not the committed end)
    pub end: u64,
    /// End of committed memory
    pub committed: u64,
    /// Whether this segment belongs to the large-object chain
    pub large: bool,
}

/// One object yielded by the heap walk.
#[derive(Debug, Clone)]
pub struct HeapObject {
    /// Object address
    pub address: u64,
    /// Resolved type
    pub ty: Arc<ClrType>,
}

/// The reconstructed GC heap of one session revision.
pub struct ClrHeap {
    dac: Arc<dyn DacInterface>,
    abi: AbiProfile,
    revision: u32,
    current: Arc<AtomicU32>,
    common: CommonMethodTables,
    subheaps: Vec<SubHeap>,
    types: boxcar::Vec<Arc<ClrType>>,
    by_handle: DashMap<TypeHandle, TypeIndex>,
    by_identity: DashMap<(u64, u32), TypeIndex>,
    placeholder_arrays: DashMap<(u8, u32), TypeIndex>,
    module_cache: DashMap<u64, ModuleData>,
    object_array: OnceLock<Option<TypeIndex>>,
    last_object: Mutex<Option<(u64, TypeIndex)>>,
    preloaded: AtomicBool,
    lock_snapshot: OnceLock<Arc<LockSnapshot>>,
}

impl ClrHeap {
    /// Build the heap view for the current revision.
    ///
    /// Fetches the well-known method tables (fatal on failure) and the GC
    /// segment map (tolerated on failure - the heap degrades to an empty
    /// segment list).
    pub(crate) fn new(
        dac: Arc<dyn DacInterface>,
        abi: AbiProfile,
        revision: u32,
        current: Arc<AtomicU32>,
    ) -> Result<Self> {
        let common = dac.common_method_tables()?;
        let subheaps = Self::read_subheaps(dac.as_ref());
        debug!(
            revision,
            heaps = subheaps.len(),
            "reconstructed GC heap layout"
        );
        Ok(ClrHeap {
            dac,
            abi,
            revision,
            current,
            common,
            subheaps,
            types: boxcar::Vec::new(),
            by_handle: DashMap::new(),
            by_identity: DashMap::new(),
            placeholder_arrays: DashMap::new(),
            module_cache: DashMap::new(),
            object_array: OnceLock::new(),
            last_object: Mutex::new(None),
            preloaded: AtomicBool::new(false),
            lock_snapshot: OnceLock::new(),
        })
    }

    fn read_subheaps(dac: &dyn DacInterface) -> Vec<SubHeap> {
        let details = match dac.heap_list() {
            Ok(details) => details,
            Err(err) => {
                warn!(%err, "GC heap list unavailable; segment map will be empty");
                return Vec::new();
            }
        };

        let mut subheaps = Vec::with_capacity(details.len());
        for heap in details {
            let mut segments = Vec::new();
            Self::walk_segment_chain(dac, heap.first_segment, &heap, false, &mut segments);
            Self::walk_segment_chain(dac, heap.first_large_segment, &heap, true, &mut segments);
            subheaps.push(SubHeap {
                address: heap.address,
                segments,
                gen0_start: heap.gen0_start,
                gen1_start: heap.gen1_start,
                gen2_start: heap.gen2_start,
            });
        }
        subheaps
    }

    fn walk_segment_chain(
        dac: &dyn DacInterface,
        first: u64,
        heap: &crate::dac::HeapDetails,
        large: bool,
        out: &mut Vec<ClrSegment>,
    ) {
        let mut address = first;
        let mut seen = 0;
        while address != 0 && seen < MAX_SEGMENTS {
            let Ok(data) = dac.segment_data(address) else {
                break;
            };
            seen += 1;
            let end = if address == heap.ephemeral_segment {
                heap.ephemeral_allocated
            } else {
                data.allocated
            };
            out.push(ClrSegment {
                address,
                start: data.start,
                end,
                committed: data.committed,
                large,
            });
            address = data.next;
        }
    }

    /// The revision this heap view was built for.
    #[must_use]
    pub fn revision(&self) -> u32 {
        self.revision
    }

    /// The session's layout tables.
    #[must_use]
    pub fn abi(&self) -> &AbiProfile {
        &self.abi
    }

    /// The GC heaps and their segment maps.
    #[must_use]
    pub fn subheaps(&self) -> &[SubHeap] {
        &self.subheaps
    }

    pub(crate) fn dac(&self) -> &dyn DacInterface {
        self.dac.as_ref()
    }

    /// Fail loudly if the runtime has been flushed since this heap was built.
    fn ensure_current(&self) -> Result<()> {
        let current = self.current.load(Ordering::Acquire);
        if current != self.revision {
            return Err(Error::RevisionMismatch {
                cached: self.revision,
                current,
            });
        }
        Ok(())
    }

    /// Like [`Self::ensure_current`], but for a type record handed back in.
    fn check_type(&self, ty: &ClrType) -> Result<()> {
        let current = self.current.load(Ordering::Acquire);
        if ty.revision != current {
            return Err(Error::RevisionMismatch {
                cached: ty.revision,
                current,
            });
        }
        Ok(())
    }

    /// The arena record at `index`, if it exists.
    #[must_use]
    pub fn type_at(&self, index: TypeIndex) -> Option<Arc<ClrType>> {
        self.types.get(index.0 as usize).map(Arc::clone)
    }

    /// Resolve the type behind a `(method table, component)` pair.
    ///
    /// This is the registry's front door. A `0` method table resolves to
    /// `None`; a handle seen before comes straight from the arena; an array
    /// method table with no known component aliases to the shared
    /// `System.Object[]` entry; everything else goes through record
    /// construction with `(module, token)` collapse for shared generic
    /// instantiations. When `obj` is a live array instance, its element type
    /// handle fills in the missing component before lookup.
    ///
    /// Any DAC failure mid-resolution aborts the whole lookup to `Ok(None)` -
    /// a half-described type is worse than none.
    ///
    /// # Errors
    /// Returns [`Error::RevisionMismatch`] if the runtime was flushed.
    pub fn heap_type(
        &self,
        method_table: u64,
        component_mt: u64,
        obj: u64,
    ) -> Result<Option<Arc<ClrType>>> {
        self.ensure_current()?;
        if method_table == 0 {
            return Ok(None);
        }

        let mut component_mt = component_mt;
        if method_table == self.common.array && component_mt == 0 && obj != 0 {
            if let Ok(data) = self.dac.object_data(obj) {
                component_mt = data.element_type_handle;
            }
        }

        if method_table == self.common.array && component_mt == 0 {
            // No component in sight: alias to the canonical object array so
            // every such request shares one record.
            let resolved = self.object_array_entry();
            if let Some(ty) = &resolved {
                self.by_handle
                    .insert(TypeHandle::new(method_table, 0), ty.index());
            }
            return Ok(resolved);
        }

        let handle = TypeHandle::new(method_table, component_mt);
        if let Some(index) = self.by_handle.get(&handle) {
            return Ok(self.type_at(*index));
        }

        Ok(self.resolve_new_type(handle))
    }

    /// The shared `System.Object[]` arena entry, resolved on first use.
    fn object_array_entry(&self) -> Option<Arc<ClrType>> {
        let index = *self.object_array.get_or_init(|| {
            let handle = TypeHandle::new(self.common.array, self.common.object);
            if let Some(index) = self.by_handle.get(&handle) {
                return Some(*index);
            }
            self.resolve_new_type(handle).map(|t| t.index())
        });
        index.and_then(|i| self.type_at(i))
    }

    fn resolve_new_type(&self, handle: TypeHandle) -> Option<Arc<ClrType>> {
        let mt = handle.method_table;
        let Ok(mtd) = self.dac.method_table_data(mt) else {
            return None;
        };

        if mtd.free {
            let index = self.insert_type(
                handle,
                "Free".to_string(),
                0,
                Token::new(0),
                &mtd,
                &EEClassData::default(),
                TypeKind::Object,
                true,
            );
            return self.type_at(index);
        }

        let Ok(ecd) = self.dac.eeclass_data(mt) else {
            return None;
        };

        let dynamic = self
            .module_info(ecd.module)
            .is_some_and(|m| m.is_dynamic);
        // Reflection-emit modules have no stable tokens; the raw method table
        // address stands in as the dedup key.
        let token_raw = if dynamic { mt as u32 } else { ecd.token };
        if token_raw == INVALID_TOKEN {
            return None;
        }

        let is_array =
            mt == self.common.array || (mtd.component_size != 0 && mt != self.common.string);

        // Arrays sharing the well-known array method table get their name
        // from the component; the table's own name cannot tell them apart.
        let mut name = None;
        if is_array && handle.component_method_table != 0 {
            if let Ok(Some(component)) = self.heap_type(handle.component_method_table, 0, 0) {
                name = Some(format!("{}[]", component.name()));
            }
        }
        let name = name.unwrap_or_else(|| match self.dac.method_table_name(mt) {
            Ok(Some(name)) => name,
            _ => UNKNOWN_TYPE_NAME.to_string(),
        });

        // Shared generic instantiations produce many method tables for one
        // (module, token); an equal name means the same type and the handle
        // aliases the existing record. An unknown name never collapses, and
        // arrays never participate - every distinct component keeps its own
        // record under the shared array token.
        if !is_array && name != UNKNOWN_TYPE_NAME {
            if let Some(existing) = self.by_identity.get(&(ecd.module, token_raw)) {
                let existing = *existing;
                if let Some(ty) = self.type_at(existing) {
                    if ty.name() == name {
                        self.by_handle.insert(handle, existing);
                        return Some(ty);
                    }
                }
            }
        }

        let kind = if is_array {
            let info = ArrayInfo::new(rank_from_name(&name));
            if handle.component_method_table != 0 {
                let _ = info.component_mt.set(handle.component_method_table);
            }
            TypeKind::Array(info)
        } else {
            TypeKind::Object
        };

        let index = self.insert_type(
            handle,
            name.clone(),
            ecd.module,
            Token::new(token_raw),
            &mtd,
            &ecd,
            kind,
            false,
        );
        if !is_array && name != UNKNOWN_TYPE_NAME {
            self.by_identity
                .entry((ecd.module, token_raw))
                .or_insert(index);
        }
        self.type_at(index)
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_type(
        &self,
        handle: TypeHandle,
        name: String,
        module: u64,
        token: Token,
        mtd: &MethodTableData,
        ecd: &EEClassData,
        kind: TypeKind,
        is_free: bool,
    ) -> TypeIndex {
        // Single consuming thread: count-then-push is the index assignment.
        let index = TypeIndex(self.types.count() as u32);
        self.types.push(Arc::new(ClrType {
            index,
            revision: self.revision,
            handle,
            name,
            module,
            token,
            base_size: mtd.base_size,
            component_size: mtd.component_size,
            contains_pointers: mtd.contains_pointers,
            shared: mtd.shared,
            is_free,
            parent_mt: mtd.parent,
            first_field: ecd.first_field,
            num_instance_fields: ecd.num_instance_fields,
            num_static_fields: ecd.num_static_fields,
            num_thread_static_fields: ecd.num_thread_static_fields,
            kind,
            base_type: OnceLock::new(),
            element_type: OnceLock::new(),
            gc_desc: OnceLock::new(),
            fields: OnceLock::new(),
            interfaces: OnceLock::new(),
        }));
        self.by_handle.insert(handle, index);
        index
    }

    /// Resolve the type of the object at `obj`.
    ///
    /// Reads the method table word (masking the two low tag bits the GC may
    /// set during relocation) and, for arrays, the component table stored two
    /// words in. A single-entry cache makes tight loops over homogeneous data
    /// nearly free.
    ///
    /// # Errors
    /// Returns [`Error::RevisionMismatch`] if the runtime was flushed.
    pub fn object_type(&self, obj: u64) -> Result<Option<Arc<ClrType>>> {
        self.ensure_current()?;
        if obj == 0 {
            return Ok(None);
        }

        if let Some((cached_addr, cached_index)) = *lock!(self.last_object) {
            if cached_addr == obj {
                return Ok(self.type_at(cached_index));
            }
        }

        let width = self.abi.pointer_width();
        let Ok(raw) = self.dac.read_pointer(obj, width) else {
            return Ok(None);
        };
        let mt = raw & !0x3;
        if mt == 0 {
            return Ok(None);
        }

        let component_mt = if mt == self.common.array {
            self.dac
                .read_pointer(obj + 2 * self.abi.pointer_size(), width)
                .unwrap_or(0)
        } else {
            0
        };

        let resolved = self.heap_type(mt, component_mt, obj)?;
        if let Some(ty) = &resolved {
            *lock!(self.last_object) = Some((obj, ty.index()));
        }
        Ok(resolved)
    }

    /// Walk every module of every domain once and force all their constructed
    /// method tables through the registry, then return an iterator over the
    /// arena.
    ///
    /// Idempotent: the preload runs once per heap view; later calls just
    /// re-iterate the arena (which may have grown through ad hoc
    /// resolutions).
    ///
    /// # Errors
    /// Returns [`Error::RevisionMismatch`] if the runtime was flushed.
    pub fn enumerate_types(&self) -> Result<impl Iterator<Item = Arc<ClrType>> + '_> {
        self.ensure_current()?;
        self.preload_types();
        Ok(self.types.iter().map(|(_, ty)| Arc::clone(ty)))
    }

    fn preload_types(&self) {
        if self.preloaded.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut domains = Vec::new();
        if let Ok(store) = self.dac.app_domain_store_data() {
            for domain in [store.system_domain, store.shared_domain] {
                if domain != 0 {
                    domains.push(domain);
                }
            }
        }
        match self.dac.app_domain_list() {
            Ok(list) => domains.extend(list),
            Err(err) => warn!(%err, "AppDomain list unavailable during type preload"),
        }

        let mut seen = HashSet::new();
        let mut modules = Vec::new();
        for domain in domains {
            let Ok(assemblies) = self.dac.assembly_list(domain) else {
                warn!(domain, "assembly list unavailable; skipping domain");
                continue;
            };
            for assembly in assemblies {
                let Ok(list) = self.dac.module_list(assembly) else {
                    warn!(assembly, "module list unavailable; skipping assembly");
                    continue;
                };
                for module in list {
                    if seen.insert(module) {
                        modules.push(module);
                    }
                }
            }
        }

        for module in modules {
            match self.dac.method_table_list(module) {
                Ok(tables) => {
                    for mt in tables {
                        if let Ok(Some(ty)) = self.heap_type(mt, 0, 0) {
                            let _ = self.element_type(&ty);
                        }
                    }
                }
                Err(err) => {
                    warn!(module, %err, "method table list unavailable; skipping module");
                }
            }
        }
    }

    /// The base type of `ty`, resolved and cached on first call.
    ///
    /// # Errors
    /// Returns [`Error::RevisionMismatch`] if the runtime was flushed.
    pub fn base_type(&self, ty: &ClrType) -> Result<Option<Arc<ClrType>>> {
        self.check_type(ty)?;
        let index = *ty.base_type.get_or_init(|| {
            if ty.parent_mt == 0 {
                None
            } else {
                self.heap_type(ty.parent_mt, 0, 0)
                    .ok()
                    .flatten()
                    .map(|t| t.index())
            }
        });
        Ok(index.and_then(|i| self.type_at(i)))
    }

    /// The element kind of `ty`, inferred and cached on first call.
    ///
    /// Inference walks the base chain (bounded) and classifies at the
    /// well-known roots: `System.ValueType` resolves primitives by name,
    /// `System.Enum` answers `Int32`, `System.Object` answers `Class`. A
    /// chain that never reaches a root defaults to `Object`.
    ///
    /// # Errors
    /// Returns [`Error::RevisionMismatch`] if the runtime was flushed.
    pub fn element_type(&self, ty: &Arc<ClrType>) -> Result<ClrElementType> {
        self.check_type(ty)?;
        if let Some(element) = ty.element_type.get() {
            return Ok(*element);
        }
        let inferred = self.infer_element(ty);
        Ok(*ty.element_type.get_or_init(|| inferred))
    }

    fn infer_element(&self, ty: &Arc<ClrType>) -> ClrElementType {
        match &ty.kind {
            TypeKind::Placeholder { element } => return *element,
            TypeKind::Array(info) => {
                return if info.rank() > 1 {
                    ClrElementType::Array
                } else {
                    ClrElementType::SZArray
                };
            }
            TypeKind::Object => {}
        }
        if ty.handle.method_table == self.common.string {
            return ClrElementType::String;
        }
        if ty.is_free {
            return ClrElementType::Unknown;
        }

        let mut current = Arc::clone(ty);
        for _ in 0..BASE_CHAIN_LIMIT {
            let Some(base) = self.base_type(&current).ok().flatten() else {
                return ClrElementType::Object;
            };
            match base.name() {
                "System.ValueType" => {
                    return primitive_from_name(current.name())
                        .unwrap_or(ClrElementType::Struct);
                }
                "System.Enum" => return ClrElementType::Int32,
                "System.Object" => return ClrElementType::Class,
                _ => current = base,
            }
        }
        ClrElementType::Object
    }

    /// The component type of an array, resolved and cached on first call.
    ///
    /// # Errors
    /// Returns [`Error::RevisionMismatch`] if the runtime was flushed.
    pub fn array_component_type(&self, ty: &Arc<ClrType>) -> Result<Option<Arc<ClrType>>> {
        self.check_type(ty)?;
        let TypeKind::Array(info) = &ty.kind else {
            return Ok(None);
        };
        let index = *info.component.get_or_init(|| {
            let cmt = info
                .component_mt
                .get()
                .copied()
                .unwrap_or(ty.handle.component_method_table);
            if cmt == 0 {
                None
            } else {
                self.heap_type(cmt, 0, 0).ok().flatten().map(|t| t.index())
            }
        });
        let resolved = index.and_then(|i| self.type_at(i));
        if let Some(component) = &resolved {
            if let Ok(element) = self.element_type(component) {
                let _ = info.component_element.set(element);
            }
        }
        Ok(resolved)
    }

    /// The field collections of `ty`, built and cached on first call.
    ///
    /// # Errors
    /// Returns [`Error::RevisionMismatch`] if the runtime was flushed.
    pub fn fields(&self, ty: &ClrType) -> Result<Arc<TypeFields>> {
        self.check_type(ty)?;
        Ok(Arc::clone(
            ty.fields
                .get_or_init(|| Arc::new(fields::build_fields(self, ty))),
        ))
    }

    /// Names of the interfaces `ty` implements, its own chained with its base
    /// type's. Cached on first call.
    ///
    /// # Errors
    /// Returns [`Error::RevisionMismatch`] if the runtime was flushed.
    pub fn interfaces(&self, ty: &Arc<ClrType>) -> Result<Arc<Vec<String>>> {
        self.check_type(ty)?;
        Ok(Arc::clone(ty.interfaces.get_or_init(|| {
            Arc::new(self.collect_interfaces(ty, BASE_CHAIN_LIMIT))
        })))
    }

    fn collect_interfaces(&self, ty: &Arc<ClrType>, depth: usize) -> Vec<String> {
        let mut names = Vec::new();
        if let Ok(list) = self.dac.interface_list(ty.method_table()) {
            for mt in list {
                if let Ok(Some(iface)) = self.heap_type(mt, 0, 0) {
                    if !names.iter().any(|n| n == iface.name()) {
                        names.push(iface.name().to_string());
                    }
                }
            }
        }
        if depth > 0 {
            if let Ok(Some(base)) = self.base_type(ty) {
                for name in self.collect_interfaces(&base, depth - 1) {
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
            }
        }
        names
    }

    /// The GC tracing descriptor of `ty`, decoded and cached on first call.
    ///
    /// A type without pointers, or one whose descriptor region cannot be
    /// read, reports `None` - tracing treats both as "nothing to scan".
    ///
    /// # Errors
    /// Returns [`Error::RevisionMismatch`] if the runtime was flushed.
    pub fn gc_desc(&self, ty: &ClrType) -> Result<Option<GcDesc>> {
        self.check_type(ty)?;
        Ok(ty.gc_desc.get_or_init(|| self.build_gc_desc(ty)).clone())
    }

    fn build_gc_desc(&self, ty: &ClrType) -> Option<GcDesc> {
        if !ty.contains_pointers {
            return None;
        }
        let ptr = self.abi.pointer_size();
        let mt = ty.method_table();

        let count_slot = mt.checked_sub(ptr)?;
        let raw = self.dac.read_pointer(count_slot, self.abi.pointer_width()).ok()?;
        let count = match self.abi.pointer_width() {
            crate::memory::PointerWidth::Bits32 => i64::from(raw as u32 as i32),
            crate::memory::PointerWidth::Bits64 => raw as i64,
        };
        let entries = count.unsigned_abs();
        if entries == 0 || entries > MAX_GCDESC_SERIES as u64 {
            return None;
        }

        let length = (1 + 2 * entries) * ptr;
        let start = mt.checked_sub(length)?;
        let mut data = vec![0u8; length as usize];
        if self.dac.read_memory(start, &mut data).is_err() {
            return None;
        }
        Some(GcDesc::new(data, ptr as usize))
    }

    /// Register (or reuse) a placeholder array type synthesized from a field
    /// signature. Keyed by `(component element, rank)`, so every field of the
    /// same unresolved array shape shares one record.
    pub(crate) fn synthesize_array_type(
        &self,
        component: ClrElementType,
        rank: u32,
    ) -> Option<TypeIndex> {
        let key = (component.to_u8(), rank);
        if let Some(index) = self.placeholder_arrays.get(&key) {
            return Some(*index);
        }

        let element = if rank > 1 {
            ClrElementType::Array
        } else {
            ClrElementType::SZArray
        };
        let mut name = element_system_name(component).to_string();
        name.push('[');
        for _ in 1..rank {
            name.push(',');
        }
        name.push(']');

        let index = TypeIndex(self.types.count() as u32);
        let element_cell = OnceLock::new();
        let _ = element_cell.set(element);
        self.types.push(Arc::new(ClrType {
            index,
            revision: self.revision,
            handle: TypeHandle::new(0, 0),
            name,
            module: 0,
            token: Token::new(0),
            base_size: 0,
            component_size: 0,
            contains_pointers: component.is_object_reference(),
            shared: false,
            is_free: false,
            parent_mt: 0,
            first_field: 0,
            num_instance_fields: 0,
            num_static_fields: 0,
            num_thread_static_fields: 0,
            kind: TypeKind::Placeholder { element },
            base_type: OnceLock::new(),
            element_type: element_cell,
            gc_desc: OnceLock::new(),
            fields: OnceLock::new(),
            interfaces: OnceLock::new(),
        }));
        self.placeholder_arrays.insert(key, index);
        Some(index)
    }

    /// Cached module description.
    pub(crate) fn module_info(&self, module: u64) -> Option<ModuleData> {
        if module == 0 {
            return None;
        }
        if let Some(cached) = self.module_cache.get(&module) {
            return Some(cached.clone());
        }
        match self.dac.module_data(module) {
            Ok(data) => {
                self.module_cache.insert(module, data.clone());
                Some(data)
            }
            Err(_) => None,
        }
    }

    /// Runtime-assigned module id, used for static storage lookup.
    pub(crate) fn module_id(&self, module: u64) -> Option<u64> {
        self.module_info(module).map(|m| m.id)
    }

    /// Decode the payload of the string object at `obj`.
    ///
    /// The length and first-character offsets come from the ABI tables. A
    /// zero length reads no character data at all; an unreadable payload
    /// answers `None`.
    ///
    /// # Errors
    /// Returns [`Error::RevisionMismatch`] if the runtime was flushed.
    pub fn string_contents(&self, obj: u64) -> Result<Option<String>> {
        self.ensure_current()?;
        if obj == 0 {
            return Ok(None);
        }

        let Ok(length) = self.dac.read_u32(obj + self.abi.string_length_offset()) else {
            return Ok(None);
        };
        if length == 0 {
            return Ok(Some(String::new()));
        }
        let length = length.min(MAX_STRING_CHARS);

        let mut buffer = vec![0u8; length as usize * 2];
        if self
            .dac
            .read_memory(obj + self.abi.string_first_char_offset(), &mut buffer)
            .is_err()
        {
            return Ok(None);
        }

        let units: Vec<u16> = buffer
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(Some(
            widestring::U16Str::from_slice(&units).to_string_lossy(),
        ))
    }

    /// The `_message` string of the exception object at `obj`.
    ///
    /// # Errors
    /// Returns [`Error::RevisionMismatch`] if the runtime was flushed.
    pub fn exception_message(&self, obj: u64) -> Result<Option<String>> {
        self.ensure_current()?;
        let Ok(message) = self
            .dac
            .read_pointer(obj + self.abi.exception_message_offset(), self.abi.pointer_width())
        else {
            return Ok(None);
        };
        if message == 0 {
            return Ok(None);
        }
        self.string_contents(message)
    }

    /// The `_HResult` of the exception object at `obj`.
    ///
    /// # Errors
    /// Returns [`Error::RevisionMismatch`] if the runtime was flushed.
    pub fn exception_hresult(&self, obj: u64) -> Result<Option<i32>> {
        self.ensure_current()?;
        Ok(self
            .dac
            .read_u32(obj + self.abi.exception_hresult_offset())
            .ok()
            .map(|raw| raw as i32))
    }

    /// Total size of the object at `obj` with type `ty`: base size plus
    /// component stride times element count, clamped to the minimum object
    /// size and aligned to the pointer width.
    #[must_use]
    pub fn object_size(&self, obj: u64, ty: &ClrType) -> u64 {
        let ptr = self.abi.pointer_size();
        let mut size = ty.base_size;
        if ty.component_size != 0 {
            // Element count sits right after the method table word.
            let count = self.dac.read_u32(obj + ptr).unwrap_or(0);
            size = size.saturating_add(u64::from(count) * u64::from(ty.component_size));
        }
        let size = size.max(self.abi.min_object_size());
        // A torn base size near u64::MAX must not overflow the align-up.
        size.saturating_add(ptr - 1) & !(ptr - 1)
    }

    /// Walk the segment map object by object.
    ///
    /// A segment whose next object cannot be typed is abandoned - the walk
    /// moves on to the following segment rather than guessing strides
    /// through unparseable memory.
    #[must_use]
    pub fn enumerate_objects(&self) -> ObjectIterator<'_> {
        let mut spans = Vec::new();
        for subheap in &self.subheaps {
            for segment in &subheap.segments {
                if segment.start < segment.end {
                    spans.push((segment.start, segment.end));
                }
            }
        }
        ObjectIterator {
            heap: self,
            spans,
            span: 0,
            current: 0,
        }
    }

    /// Triangulated lock state for this heap view, built once and cached.
    ///
    /// `threads` is the current thread list; lock records resolve owner ids
    /// against it and the stack pass scans each thread's stack span.
    ///
    /// # Errors
    /// Returns [`Error::RevisionMismatch`] if the runtime was flushed.
    pub fn blocking_objects(&self, threads: &[Arc<ClrThread>]) -> Result<Arc<LockSnapshot>> {
        self.ensure_current()?;
        Ok(Arc::clone(self.lock_snapshot.get_or_init(|| {
            Arc::new(LockInspection::run(self, threads))
        })))
    }
}

impl std::fmt::Debug for ClrHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClrHeap")
            .field("revision", &self.revision)
            .field("types", &self.types.count())
            .field("subheaps", &self.subheaps.len())
            .finish_non_exhaustive()
    }
}

/// Segment-by-segment object walk; see [`ClrHeap::enumerate_objects`].
pub struct ObjectIterator<'a> {
    heap: &'a ClrHeap,
    spans: Vec<(u64, u64)>,
    span: usize,
    current: u64,
}

impl Iterator for ObjectIterator<'_> {
    type Item = HeapObject;

    fn next(&mut self) -> Option<HeapObject> {
        loop {
            let (start, end) = *self.spans.get(self.span)?;
            if self.current < start {
                self.current = start;
            }
            if self.current >= end {
                self.span += 1;
                self.current = 0;
                continue;
            }

            let address = self.current;
            match self.heap.object_type(address) {
                Ok(Some(ty)) => {
                    let size = self.heap.object_size(address, &ty);
                    let next = address.saturating_add(size);
                    if next <= address {
                        // A stride that cannot advance would pin the walk here.
                        self.span += 1;
                        self.current = 0;
                        continue;
                    }
                    self.current = next;
                    return Some(HeapObject { address, ty });
                }
                _ => {
                    // Unparseable object: the rest of this segment is
                    // unreachable without its stride.
                    self.span += 1;
                    self.current = 0;
                }
            }
        }
    }
}

/// Array rank from a type name's trailing bracket group; 1 when absent.
fn rank_from_name(name: &str) -> u32 {
    if name.ends_with(']') {
        if let Some(open) = name.rfind('[') {
            return name[open..].matches(',').count() as u32 + 1;
        }
    }
    1
}

/// Canonical `System.*` name for a primitive element kind; reference kinds
/// fall back to `System.Object`.
fn element_system_name(element: ClrElementType) -> &'static str {
    match element {
        ClrElementType::Boolean => "System.Boolean",
        ClrElementType::Char => "System.Char",
        ClrElementType::Int8 => "System.SByte",
        ClrElementType::UInt8 => "System.Byte",
        ClrElementType::Int16 => "System.Int16",
        ClrElementType::UInt16 => "System.UInt16",
        ClrElementType::Int32 => "System.Int32",
        ClrElementType::UInt32 => "System.UInt32",
        ClrElementType::Int64 => "System.Int64",
        ClrElementType::UInt64 => "System.UInt64",
        ClrElementType::Float => "System.Single",
        ClrElementType::Double => "System.Double",
        ClrElementType::String => "System.String",
        ClrElementType::NativeInt => "System.IntPtr",
        ClrElementType::NativeUInt => "System.UIntPtr",
        _ => "System.Object",
    }
}
