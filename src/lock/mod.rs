//! Lock-state triangulation.
//!
//! No single runtime structure lists "who waits on what". The picture is assembled from
//! three independent sources:
//!
//! 1. **Heap pass** - every live object once. `ReaderWriterLock` and
//!    `ReaderWriterLockSlim` instances are decoded through their internal fields (owner
//!    ids, reader records); ordinary objects are checked for a *thin lock* in the header
//!    word, the inline form the runtime uses before a monitor ever contends.
//! 2. **Syncblock pass** - the runtime's syncblock table, one entry per object whose
//!    monitor inflated. Held entries resolve to their owning thread; each record is
//!    indexed by both the protected object's address and the syncblock's own address,
//!    because a waiting thread's stack may hold either.
//! 3. **Stack pass** - per thread, the innermost frames are matched against the
//!    well-known BCL wait entry points; on a match, the thread's stack span is scanned
//!    word by word for references to known lock objects, and the thread is attached as a
//!    waiter with a best-guess reason.
//!
//! The reason assignment is a documented heuristic, not ground truth: a stack word may be
//! a stale copy, and the frame table cannot distinguish a timed-out wait from a pending
//! one. The guessed reason for reader/writer acquisition names the holder that blocks the
//! waiter, which is the convention of the original inspection this decoding follows.
//!
//! Every pass is bounded and failure-tolerant: unreadable words are skipped, unresolvable
//! thread ids drop the record, and a thread whose stack cannot be walked contributes
//! nothing.

use std::{collections::HashMap, sync::Arc};

use tracing::debug;

use crate::{
    heap::{ClrHeap, ClrValue},
    memory::MemoryReader,
    runtime::threads::ClrThread,
};

/// Object header bit: the header word holds a hash code or syncblock index,
/// not a thin lock.
const BIT_HASH_OR_SYNCBLOCK: u32 = 0x0800_0000;
/// Object header bit: the header spinlock is taken.
const BIT_SPIN_LOCK: u32 = 0x1000_0000;
/// Thin-lock owner thread id sub-field.
const MASK_LOCK_THREAD_ID: u32 = 0x0000_03FF;
/// Thin-lock recursion sub-field.
const MASK_LOCK_RECURSION: u32 = 0x0000_FC00;
const LOCK_RECURSION_SHIFT: u32 = 10;

/// Innermost frames inspected per thread during the stack pass.
const FRAME_SEARCH_DEPTH: usize = 10;
/// Cap on the legacy reader-record list walk.
const MAX_READER_RECORDS: usize = 256;
/// Cap on stack words examined per span; a torn stack base/limit pair must
/// not turn the scan into a full address-space sweep.
const MAX_SCAN_WORDS: usize = 16 * 1024;

const RWLOCK_NAME: &str = "System.Threading.ReaderWriterLock";
const RWLOCK_SLIM_NAME: &str = "System.Threading.ReaderWriterLockSlim";
const THREAD_NAME: &str = "System.Threading.Thread";

/// Types a `WaitHandle`-family wait can plausibly target.
const WAIT_HANDLE_NAMES: &[&str] = &[
    "System.Threading.WaitHandle",
    "System.Threading.EventWaitHandle",
    "System.Threading.AutoResetEvent",
    "System.Threading.ManualResetEvent",
    "System.Threading.Mutex",
    "System.Threading.Semaphore",
];

/// Why a thread is (probably) blocked on an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockedReason {
    /// Held or known lock with no observed waiter
    None,
    /// Waiting to enter a monitor
    Monitor,
    /// Inside `Monitor.Wait`
    MonitorWait,
    /// `WaitHandle.WaitOne`
    WaitOne,
    /// `WaitHandle.WaitAny`
    WaitAny,
    /// `WaitHandle.WaitAll`
    WaitAll,
    /// `Thread.Join`
    ThreadJoin,
    /// Blocked on a reader-writer lock a reader holds
    ReaderAcquired,
    /// Blocked on a reader-writer lock a writer holds
    WriterAcquired,
}

/// One lock object with its observed owners and waiters.
#[derive(Debug, Clone)]
pub struct BlockingObject {
    /// Address of the lock object on the GC heap
    pub object: u64,
    /// Whether some thread holds the lock
    pub taken: bool,
    /// Recursion count, where the lock form tracks one
    pub recursion: u32,
    /// Threads holding the lock
    pub owners: Vec<Arc<ClrThread>>,
    /// Threads observed waiting on the lock
    pub waiters: Vec<Arc<ClrThread>>,
    /// Best-guess reason for the waiters
    pub reason: BlockedReason,
}

impl BlockingObject {
    fn new(object: u64) -> Self {
        BlockingObject {
            object,
            taken: false,
            recursion: 0,
            owners: Vec::new(),
            waiters: Vec::new(),
            reason: BlockedReason::None,
        }
    }

    /// Whether any thread was seen waiting.
    #[must_use]
    pub fn has_waiters(&self) -> bool {
        !self.waiters.is_empty()
    }
}

/// The immutable result of one lock inspection.
#[derive(Debug, Default)]
pub struct LockSnapshot {
    objects: Vec<BlockingObject>,
    by_address: HashMap<u64, usize>,
}

impl LockSnapshot {
    /// All discovered lock objects.
    #[must_use]
    pub fn objects(&self) -> &[BlockingObject] {
        &self.objects
    }

    /// Look up a lock by object address (or by syncblock address, for
    /// inflated monitors).
    #[must_use]
    pub fn find(&self, address: u64) -> Option<&BlockingObject> {
        self.by_address.get(&address).map(|&i| &self.objects[i])
    }

    /// Number of discovered lock objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether no lock objects were found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// The three-pass inspection. See the module docs for the algorithm.
pub struct LockInspection<'a> {
    heap: &'a ClrHeap,
    threads: &'a [Arc<ClrThread>],
    records: Vec<BlockingObject>,
    /// Monitor records by protected object address
    monitors: HashMap<u64, usize>,
    /// Reader-writer lock records by object address
    rw_locks: HashMap<u64, usize>,
    /// Thread objects targeted by `Thread.Join`
    join_locks: HashMap<u64, usize>,
    /// WaitHandle-family objects
    wait_locks: HashMap<u64, usize>,
    /// Inflated monitor records by syncblock address
    syncblocks: HashMap<u64, usize>,
}

impl<'a> LockInspection<'a> {
    /// Run the full inspection and aggregate the result.
    #[must_use]
    pub fn run(heap: &'a ClrHeap, threads: &'a [Arc<ClrThread>]) -> LockSnapshot {
        let mut inspection = LockInspection {
            heap,
            threads,
            records: Vec::new(),
            monitors: HashMap::new(),
            rw_locks: HashMap::new(),
            join_locks: HashMap::new(),
            wait_locks: HashMap::new(),
            syncblocks: HashMap::new(),
        };

        inspection.heap_pass();
        inspection.syncblock_pass();
        inspection.stack_pass();

        let mut by_address = HashMap::new();
        for (index, record) in inspection.records.iter().enumerate() {
            by_address.insert(record.object, index);
        }
        for (&address, &index) in &inspection.syncblocks {
            by_address.entry(address).or_insert(index);
        }
        debug!(locks = inspection.records.len(), "lock inspection complete");
        LockSnapshot {
            objects: inspection.records,
            by_address,
        }
    }

    // -- pass 1: heap ------------------------------------------------------

    fn heap_pass(&mut self) {
        let objects: Vec<_> = self.heap.enumerate_objects().collect();
        for obj in objects {
            match obj.ty.name() {
                RWLOCK_NAME => self.decode_rwlock(obj.address, &obj.ty),
                RWLOCK_SLIM_NAME => self.decode_rwlock_slim(obj.address, &obj.ty),
                _ => {
                    if !obj.ty.is_free() {
                        self.decode_thin_lock(obj.address);
                    }
                }
            }
        }
    }

    fn decode_rwlock(&mut self, object: u64, ty: &Arc<crate::heap::ClrType>) {
        let mut record = BlockingObject::new(object);

        if let Some(writer) = self.read_i32_field(ty, object, "_dwWriterID") {
            if writer > 0 {
                record.taken = true;
                if let Some(thread) = self.thread_by_id(writer as u32) {
                    record.owners.push(thread);
                }
            }
        }

        // Reader records hang off the lock's internal data block: each entry
        // is a thread id followed by a next pointer.
        let ptr = self.heap.abi().pointer_size();
        let width = self.heap.abi().pointer_width();
        if let Ok(block) = self
            .heap
            .dac()
            .read_pointer(object + self.heap.abi().rwlock_data_offset(), width)
        {
            let mut entry = block;
            let mut seen = 0;
            while entry != 0 && seen < MAX_READER_RECORDS {
                seen += 1;
                let Ok(id) = self.heap.dac().read_u32(entry) else {
                    break;
                };
                if id > 0 {
                    if let Some(thread) = self.thread_by_id(id) {
                        record.taken = true;
                        if !record.owners.iter().any(|t| t.address() == thread.address()) {
                            record.owners.push(thread);
                        }
                    }
                }
                entry = self.heap.dac().read_pointer(entry + ptr, width).unwrap_or(0);
            }
        }

        let index = self.records.len();
        self.records.push(record);
        self.rw_locks.insert(object, index);
    }

    fn decode_rwlock_slim(&mut self, object: u64, ty: &Arc<crate::heap::ClrType>) {
        let mut record = BlockingObject::new(object);

        for field in ["writeLockOwnerId", "upgradeLockOwnerId"] {
            if let Some(id) = self.read_i32_field(ty, object, field) {
                if id > 0 {
                    record.taken = true;
                    if let Some(thread) = self.thread_by_id(id as u32) {
                        if !record.owners.iter().any(|t| t.address() == thread.address()) {
                            record.owners.push(thread);
                        }
                    }
                }
            }
        }

        let index = self.records.len();
        self.records.push(record);
        self.rw_locks.insert(object, index);
    }

    /// Decode a thin lock from the header dword preceding the object. Only
    /// meaningful when the hash/syncblock and spinlock bits are both clear.
    fn decode_thin_lock(&mut self, object: u64) {
        let Some(header_addr) = object.checked_sub(4) else {
            return;
        };
        let Ok(header) = self.heap.dac().read_u32(header_addr) else {
            return;
        };
        if header & (BIT_HASH_OR_SYNCBLOCK | BIT_SPIN_LOCK) != 0 {
            return;
        }
        let thread_id = header & MASK_LOCK_THREAD_ID;
        if thread_id == 0 {
            return;
        }
        let Some(thread) = self.thread_by_id(thread_id) else {
            return;
        };

        let index = self.monitor_record(object);
        let record = &mut self.records[index];
        record.taken = true;
        record.recursion = (header & MASK_LOCK_RECURSION) >> LOCK_RECURSION_SHIFT;
        if !record.owners.iter().any(|t| t.address() == thread.address()) {
            record.owners.push(thread);
        }
    }

    // -- pass 2: syncblocks ------------------------------------------------

    fn syncblock_pass(&mut self) {
        let Ok(count) = self.heap.dac().sync_block_count() else {
            return;
        };
        for index in 1..=count {
            let Ok(data) = self.heap.dac().sync_block_data(index) else {
                continue;
            };
            if data.free || data.object == 0 {
                continue;
            }
            if data.monitor_held == 0 {
                continue;
            }

            let record_index = self.monitor_record(data.object);
            let owner = self
                .threads
                .iter()
                .find(|t| t.address() == data.holding_thread)
                .cloned();
            let record = &mut self.records[record_index];
            record.taken = true;
            record.recursion = record.recursion.max(data.recursion);
            if let Some(owner) = owner {
                if !record.owners.iter().any(|t| t.address() == owner.address()) {
                    record.owners.push(owner);
                }
            }
            self.syncblocks
                .insert(data.sync_block_pointer, record_index);
        }
    }

    // -- pass 3: stacks ----------------------------------------------------

    fn stack_pass(&mut self) {
        for thread in self.threads {
            let Ok(frames) = self.heap.dac().stack_frames(thread.address()) else {
                continue;
            };
            for frame in frames.iter().take(FRAME_SEARCH_DEPTH) {
                let Some(name) = frame.method_name.as_deref() else {
                    continue;
                };
                let Some(reason) = guess_reason(name) else {
                    continue;
                };
                self.scan_stack_for_lock(thread, frame.stack_pointer, reason);
            }
        }
    }

    /// Scan the thread's stack span for words referencing a known lock, the
    /// span below the matched frame first.
    fn scan_stack_for_lock(&mut self, thread: &Arc<ClrThread>, frame_sp: u64, reason: BlockedReason) {
        let low = thread.stack_limit();
        let high = thread.stack_base();
        if low == 0 || high <= low {
            return;
        }
        let frame_sp = frame_sp.clamp(low, high);

        if self.scan_span(thread, low, frame_sp, reason) {
            return;
        }
        self.scan_span(thread, frame_sp, high, reason);
    }

    fn scan_span(
        &mut self,
        thread: &Arc<ClrThread>,
        start: u64,
        end: u64,
        reason: BlockedReason,
    ) -> bool {
        let ptr = self.heap.abi().pointer_size();
        let width = self.heap.abi().pointer_width();
        let mut address = start;
        let mut scanned = 0;
        while address < end && scanned < MAX_SCAN_WORDS {
            scanned += 1;
            let slot = address;
            let Some(next) = address.checked_add(ptr) else {
                break;
            };
            address = next;
            let Ok(value) = self.heap.dac().read_pointer(slot, width) else {
                continue;
            };
            if value == 0 {
                continue;
            }
            if let Some(index) = self.match_candidate(value, reason) {
                self.attach_waiter(index, thread, reason);
                return true;
            }
        }
        false
    }

    /// Resolve a stack word to a lock record appropriate for `reason`,
    /// creating join/wait records on first sight of their target objects.
    fn match_candidate(&mut self, value: u64, reason: BlockedReason) -> Option<usize> {
        match reason {
            BlockedReason::Monitor | BlockedReason::MonitorWait => self
                .monitors
                .get(&value)
                .or_else(|| self.syncblocks.get(&value))
                .copied(),
            BlockedReason::ReaderAcquired | BlockedReason::WriterAcquired => {
                self.rw_locks.get(&value).copied()
            }
            BlockedReason::ThreadJoin => {
                if let Some(&index) = self.join_locks.get(&value) {
                    return Some(index);
                }
                let ty = self.heap.object_type(value).ok().flatten()?;
                if ty.name() != THREAD_NAME {
                    return None;
                }
                let index = self.records.len();
                self.records.push(BlockingObject::new(value));
                self.join_locks.insert(value, index);
                Some(index)
            }
            BlockedReason::WaitOne | BlockedReason::WaitAny | BlockedReason::WaitAll => {
                if let Some(&index) = self.wait_locks.get(&value) {
                    return Some(index);
                }
                let ty = self.heap.object_type(value).ok().flatten()?;
                if !WAIT_HANDLE_NAMES.contains(&ty.name()) {
                    return None;
                }
                let index = self.records.len();
                self.records.push(BlockingObject::new(value));
                self.wait_locks.insert(value, index);
                Some(index)
            }
            BlockedReason::None => None,
        }
    }

    fn attach_waiter(&mut self, index: usize, thread: &Arc<ClrThread>, reason: BlockedReason) {
        let record = &mut self.records[index];
        if record
            .waiters
            .iter()
            .any(|t| t.address() == thread.address())
        {
            return;
        }
        record.waiters.push(Arc::clone(thread));
        if record.reason == BlockedReason::None {
            record.reason = reason;
        }
    }

    // -- shared helpers ----------------------------------------------------

    fn monitor_record(&mut self, object: u64) -> usize {
        if let Some(&index) = self.monitors.get(&object) {
            return index;
        }
        let index = self.records.len();
        self.records.push(BlockingObject::new(object));
        self.monitors.insert(object, index);
        index
    }

    fn thread_by_id(&self, managed_id: u32) -> Option<Arc<ClrThread>> {
        self.threads
            .iter()
            .find(|t| t.managed_thread_id() == managed_id)
            .cloned()
    }

    fn read_i32_field(
        &self,
        ty: &Arc<crate::heap::ClrType>,
        object: u64,
        name: &str,
    ) -> Option<i32> {
        let fields = self.heap.fields(ty).ok()?;
        let field = fields.instance_by_name(name)?;
        match field.read(self.heap, object, false)? {
            ClrValue::Int32(value) => Some(value),
            _ => None,
        }
    }
}

/// Map a BCL entry-point name to the wait reason it implies.
///
/// The reader/writer acquisitions deliberately report the holder that blocks
/// the caller: a thread inside `TryEnterWriteLock` is stalled because readers
/// hold the lock, and vice versa.
fn guess_reason(method: &str) -> Option<BlockedReason> {
    if method.contains("Monitor.Wait") {
        return Some(BlockedReason::MonitorWait);
    }
    if method.contains("Monitor.Enter")
        || method.contains("Monitor.TryEnter")
        || method.contains("Monitor.ReliableEnter")
    {
        return Some(BlockedReason::Monitor);
    }
    if method.contains("WaitHandle.WaitOne") {
        return Some(BlockedReason::WaitOne);
    }
    if method.contains("WaitHandle.WaitAny") {
        return Some(BlockedReason::WaitAny);
    }
    if method.contains("WaitHandle.WaitAll") {
        return Some(BlockedReason::WaitAll);
    }
    if method.contains("Thread.Join") {
        return Some(BlockedReason::ThreadJoin);
    }
    if method.contains("ReaderWriterLockSlim.TryEnterWriteLock")
        || method.contains("ReaderWriterLock.AcquireWriterLock")
    {
        return Some(BlockedReason::ReaderAcquired);
    }
    if method.contains("TryEnterReadLock")
        || method.contains("AcquireReaderLock")
        || method.contains("TryEnterUpgradeableReadLock")
    {
        return Some(BlockedReason::WriterAcquired);
    }
    None
}
