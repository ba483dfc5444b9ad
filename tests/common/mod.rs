#![allow(dead_code)] // each test binary uses its own subset of the fixture

//! Scriptable target fixture for the integration tests.
//!
//! Drives the crate exclusively through its public surface: a `FixtureDac` answers DAC
//! requests from hash maps and backs raw reads with byte regions, so each test lays out
//! exactly the slice of a target process it cares about.

use std::collections::HashMap;

use clrscope::dac::{
    AppDomainData, AppDomainStoreData, CommonMethodTables, DacInterface, DomainLocalModuleData,
    EEClassData, FieldData, HeapDetails, MethodTableData, ModuleData, ObjectData, SegmentData,
    StackFrameData, SyncBlockData, ThreadData, ThreadPoolData, ThreadStoreData, WorkRequestData,
};
use clrscope::{Error, MemoryReader, Result};

pub const MT_OBJECT: u64 = 0x7f00_1000;
pub const MT_STRING: u64 = 0x7f00_2000;
pub const MT_ARRAY: u64 = 0x7f00_3000;
pub const MT_EXCEPTION: u64 = 0x7f00_4000;
pub const MT_FREE: u64 = 0x7f00_5000;

pub const MSCORLIB: u64 = 0x100;

fn missing(what: String) -> Error {
    Error::Error(what)
}

/// A scriptable DAC-plus-memory target built on the public trait surface.
#[derive(Default)]
pub struct FixtureDac {
    pub common: CommonMethodTables,
    pub fail_bootstrap: bool,
    regions: Vec<(u64, Vec<u8>)>,
    method_tables: HashMap<u64, MethodTableData>,
    names: HashMap<u64, String>,
    eeclasses: HashMap<u64, EEClassData>,
    field_descs: HashMap<u64, FieldData>,
    field_names: HashMap<(u64, u32), String>,
    field_sigs: HashMap<(u64, u32), Vec<u8>>,
    objects: HashMap<u64, ObjectData>,
    modules: HashMap<u64, ModuleData>,
    domain_store: Option<AppDomainStoreData>,
    domain_list: Vec<u64>,
    domains: HashMap<u64, AppDomainData>,
    assemblies: HashMap<u64, Vec<u64>>,
    module_lists: HashMap<u64, Vec<u64>>,
    table_lists: HashMap<u64, Vec<u64>>,
    thread_store: Option<ThreadStoreData>,
    threads: HashMap<u64, ThreadData>,
    frames: HashMap<u64, Vec<StackFrameData>>,
    heaps: Vec<HeapDetails>,
    segments: HashMap<u64, SegmentData>,
    syncblocks: Vec<SyncBlockData>,
    module_locals: HashMap<u64, DomainLocalModuleData>,
    pool: Option<ThreadPoolData>,
    work_requests: HashMap<u64, WorkRequestData>,
    interfaces: HashMap<u64, Vec<u64>>,
}

impl FixtureDac {
    /// A target with the well-known method tables and mscorlib wired up.
    pub fn new() -> Self {
        let mut dac = FixtureDac::default();
        dac.common = CommonMethodTables {
            array: MT_ARRAY,
            string: MT_STRING,
            object: MT_OBJECT,
            exception: MT_EXCEPTION,
            free: MT_FREE,
        };
        dac = dac
            .with_class(MT_OBJECT, "System.Object", MSCORLIB, 0x0200_0001, 0)
            .with_class(MT_STRING, "System.String", MSCORLIB, 0x0200_0002, MT_OBJECT)
            .with_class(
                MT_EXCEPTION,
                "System.Exception",
                MSCORLIB,
                0x0200_0003,
                MT_OBJECT,
            );
        dac.method_tables.insert(
            MT_ARRAY,
            MethodTableData {
                base_size: 24,
                component_size: 8,
                parent: MT_OBJECT,
                ..MethodTableData::default()
            },
        );
        dac.names.insert(MT_ARRAY, "System.Object[]".to_string());
        dac.eeclasses.insert(
            MT_ARRAY,
            EEClassData {
                module: MSCORLIB,
                token: 0x0200_0004,
                ..EEClassData::default()
            },
        );
        dac.method_tables.insert(
            MT_FREE,
            MethodTableData {
                free: true,
                base_size: 24,
                ..MethodTableData::default()
            },
        );
        dac.modules.insert(
            MSCORLIB,
            ModuleData {
                address: MSCORLIB,
                id: 1,
                name: Some("mscorlib.dll".to_string()),
                ..ModuleData::default()
            },
        );
        dac
    }

    pub fn with_class(mut self, mt: u64, name: &str, module: u64, token: u32, parent: u64) -> Self {
        self.method_tables.insert(
            mt,
            MethodTableData {
                base_size: 24,
                parent,
                ..MethodTableData::default()
            },
        );
        self.names.insert(mt, name.to_string());
        self.eeclasses.insert(
            mt,
            EEClassData {
                module,
                token,
                ..EEClassData::default()
            },
        );
        self
    }

    pub fn with_method_table(mut self, mt: u64, data: MethodTableData) -> Self {
        self.method_tables.insert(mt, data);
        self
    }

    pub fn with_eeclass(mut self, mt: u64, data: EEClassData) -> Self {
        self.eeclasses.insert(mt, data);
        self
    }

    pub fn with_field(mut self, address: u64, data: FieldData) -> Self {
        self.field_descs.insert(address, data);
        self
    }

    pub fn with_field_name(mut self, module: u64, token: u32, name: &str) -> Self {
        self.field_names.insert((module, token), name.to_string());
        self
    }

    pub fn with_object(mut self, address: u64, data: ObjectData) -> Self {
        self.objects.insert(address, data);
        self
    }

    pub fn with_domains(mut self, store: AppDomainStoreData, list: Vec<u64>) -> Self {
        self.domain_store = Some(store);
        self.domain_list = list;
        self
    }

    pub fn with_domain(mut self, data: AppDomainData) -> Self {
        self.domains.insert(data.address, data);
        self
    }

    pub fn with_assemblies(mut self, domain: u64, assemblies: Vec<u64>) -> Self {
        self.assemblies.insert(domain, assemblies);
        self
    }

    pub fn with_modules_of(mut self, assembly: u64, modules: Vec<u64>) -> Self {
        self.module_lists.insert(assembly, modules);
        self
    }

    pub fn with_method_tables_of(mut self, module: u64, tables: Vec<u64>) -> Self {
        self.table_lists.insert(module, tables);
        self
    }

    pub fn with_threads(mut self, threads: Vec<ThreadData>) -> Self {
        self.thread_store = Some(ThreadStoreData {
            first_thread: threads.first().map_or(0, |t| t.address),
            thread_count: threads.len() as u32,
        });
        for thread in threads {
            self.threads.insert(thread.address, thread);
        }
        self
    }

    pub fn with_frames(mut self, thread: u64, frames: Vec<StackFrameData>) -> Self {
        self.frames.insert(thread, frames);
        self
    }

    /// One workstation heap with a single small-object segment covering
    /// `[start, end)`.
    pub fn with_segment(mut self, start: u64, end: u64) -> Self {
        self.heaps.push(HeapDetails {
            first_segment: 0x5000_0000,
            ..HeapDetails::default()
        });
        self.segments.insert(
            0x5000_0000,
            SegmentData {
                address: 0x5000_0000,
                start,
                allocated: end,
                committed: end,
                next: 0,
            },
        );
        self
    }

    pub fn with_syncblocks(mut self, blocks: Vec<SyncBlockData>) -> Self {
        self.syncblocks = blocks;
        self
    }

    pub fn with_module_local(mut self, module: u64, data: DomainLocalModuleData) -> Self {
        self.module_locals.insert(module, data);
        self
    }

    pub fn with_thread_pool(
        mut self,
        pool: ThreadPoolData,
        requests: Vec<(u64, WorkRequestData)>,
    ) -> Self {
        self.pool = Some(pool);
        for (address, request) in requests {
            self.work_requests.insert(address, request);
        }
        self
    }

    pub fn with_interfaces(mut self, mt: u64, list: Vec<u64>) -> Self {
        self.interfaces.insert(mt, list);
        self
    }

    pub fn with_bytes(mut self, address: u64, bytes: Vec<u8>) -> Self {
        self.regions.push((address, bytes));
        self
    }

    pub fn with_u32(self, address: u64, value: u32) -> Self {
        self.with_bytes(address, value.to_le_bytes().to_vec())
    }

    pub fn with_u64(self, address: u64, value: u64) -> Self {
        self.with_bytes(address, value.to_le_bytes().to_vec())
    }

    /// UTF-16 string payload in v4.5/64-bit layout.
    pub fn with_string_object(self, address: u64, text: &str) -> Self {
        let units: Vec<u16> = text.encode_utf16().collect();
        let mut bytes = Vec::new();
        for unit in &units {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        self.with_u64(address, MT_STRING)
            .with_u32(address + 8, units.len() as u32)
            .with_bytes(address + 12, bytes)
    }
}

impl MemoryReader for FixtureDac {
    fn read_memory(&self, address: u64, buffer: &mut [u8]) -> Result<()> {
        let len = buffer.len() as u64;
        for (base, data) in &self.regions {
            if address >= *base && address + len <= *base + data.len() as u64 {
                let offset = (address - base) as usize;
                buffer.copy_from_slice(&data[offset..offset + buffer.len()]);
                return Ok(());
            }
        }
        Err(Error::OutOfBounds)
    }
}

impl DacInterface for FixtureDac {
    fn common_method_tables(&self) -> Result<CommonMethodTables> {
        if self.fail_bootstrap {
            return Err(Error::Dac {
                hr: -0x7ff8_fff0,
                context: "well-known method tables",
            });
        }
        Ok(self.common)
    }

    fn method_table_data(&self, mt: u64) -> Result<MethodTableData> {
        self.method_tables
            .get(&mt)
            .copied()
            .ok_or_else(|| missing(format!("no method table at {mt:#x}")))
    }

    fn method_table_name(&self, mt: u64) -> Result<Option<String>> {
        Ok(self.names.get(&mt).cloned())
    }

    fn eeclass_data(&self, mt: u64) -> Result<EEClassData> {
        self.eeclasses
            .get(&mt)
            .copied()
            .ok_or_else(|| missing(format!("no EEClass for {mt:#x}")))
    }

    fn field_data(&self, address: u64) -> Result<FieldData> {
        self.field_descs
            .get(&address)
            .copied()
            .ok_or_else(|| missing(format!("no field descriptor at {address:#x}")))
    }

    fn field_name(&self, module: u64, token: u32) -> Result<Option<String>> {
        Ok(self.field_names.get(&(module, token)).cloned())
    }

    fn field_signature(&self, module: u64, token: u32) -> Result<Option<Vec<u8>>> {
        Ok(self.field_sigs.get(&(module, token)).cloned())
    }

    fn object_data(&self, address: u64) -> Result<ObjectData> {
        self.objects
            .get(&address)
            .copied()
            .ok_or_else(|| missing(format!("no object data at {address:#x}")))
    }

    fn module_data(&self, address: u64) -> Result<ModuleData> {
        self.modules
            .get(&address)
            .cloned()
            .ok_or_else(|| missing(format!("no module at {address:#x}")))
    }

    fn app_domain_store_data(&self) -> Result<AppDomainStoreData> {
        self.domain_store
            .ok_or_else(|| missing("no AppDomain store".to_string()))
    }

    fn app_domain_list(&self) -> Result<Vec<u64>> {
        Ok(self.domain_list.clone())
    }

    fn app_domain_data(&self, address: u64) -> Result<AppDomainData> {
        self.domains
            .get(&address)
            .cloned()
            .ok_or_else(|| missing(format!("no AppDomain at {address:#x}")))
    }

    fn assembly_list(&self, domain: u64) -> Result<Vec<u64>> {
        Ok(self.assemblies.get(&domain).cloned().unwrap_or_default())
    }

    fn module_list(&self, assembly: u64) -> Result<Vec<u64>> {
        Ok(self.module_lists.get(&assembly).cloned().unwrap_or_default())
    }

    fn method_table_list(&self, module: u64) -> Result<Vec<u64>> {
        self.table_lists
            .get(&module)
            .cloned()
            .ok_or_else(|| missing(format!("no method table list for {module:#x}")))
    }

    fn thread_store_data(&self) -> Result<ThreadStoreData> {
        self.thread_store
            .ok_or_else(|| missing("no thread store".to_string()))
    }

    fn thread_data(&self, address: u64) -> Result<ThreadData> {
        self.threads
            .get(&address)
            .copied()
            .ok_or_else(|| missing(format!("no thread at {address:#x}")))
    }

    fn stack_frames(&self, thread: u64) -> Result<Vec<StackFrameData>> {
        Ok(self.frames.get(&thread).cloned().unwrap_or_default())
    }

    fn heap_list(&self) -> Result<Vec<HeapDetails>> {
        Ok(self.heaps.clone())
    }

    fn segment_data(&self, address: u64) -> Result<SegmentData> {
        self.segments
            .get(&address)
            .copied()
            .ok_or_else(|| missing(format!("no segment at {address:#x}")))
    }

    fn sync_block_count(&self) -> Result<u32> {
        Ok(self.syncblocks.len() as u32)
    }

    fn sync_block_data(&self, index: u32) -> Result<SyncBlockData> {
        self.syncblocks
            .get(index.wrapping_sub(1) as usize)
            .copied()
            .ok_or_else(|| missing(format!("no syncblock {index}")))
    }

    fn domain_local_module(&self, domain: u64, module_id: u64) -> Result<DomainLocalModuleData> {
        Err(missing(format!(
            "no domain-local module ({domain:#x}, {module_id})"
        )))
    }

    fn domain_local_module_by_module(&self, module: u64) -> Result<DomainLocalModuleData> {
        self.module_locals
            .get(&module)
            .copied()
            .ok_or_else(|| missing(format!("no domain-local module for {module:#x}")))
    }

    fn thread_static_pointer(
        &self,
        thread: u64,
        _element_type: u8,
        _offset: u32,
        _module_id: u64,
        _shared: bool,
    ) -> Result<u64> {
        Err(missing(format!("no TLS slot for thread {thread:#x}")))
    }

    fn thread_pool_data(&self) -> Result<ThreadPoolData> {
        self.pool.ok_or_else(|| missing("no thread pool".to_string()))
    }

    fn work_request_data(&self, address: u64) -> Result<WorkRequestData> {
        self.work_requests
            .get(&address)
            .copied()
            .ok_or_else(|| missing(format!("no work request at {address:#x}")))
    }

    fn interface_list(&self, mt: u64) -> Result<Vec<u64>> {
        Ok(self.interfaces.get(&mt).cloned().unwrap_or_default())
    }
}
