//! Managed thread enumeration.
//!
//! Threads come from the runtime's intrusive linked list, rooted at the thread store. The
//! walk is bounded and deduplicated: a torn `next` pointer in an inconsistent target must
//! not loop the enumeration or report a thread twice.

use std::collections::HashSet;

use bitflags::bitflags;
use tracing::warn;

use crate::dac::{DacInterface, ThreadData};

/// Hard cap on the thread-list walk, over and above the store's own count.
const MAX_THREADS: usize = 4096;

bitflags! {
    /// Raw scheduler state bits of a managed thread.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ThreadState: u32 {
        /// An abort has been requested
        const ABORT_REQUESTED = 0x0000_0001;
        /// GC is waiting for this thread to suspend
        const GC_SUSPEND_PENDING = 0x0000_0002;
        /// A user suspension is pending
        const USER_SUSPEND_PENDING = 0x0000_0004;
        /// The debugger is holding the thread
        const DEBUG_SUSPEND_PENDING = 0x0000_0008;
        /// The thread has been hijacked for GC
        const HIJACKED = 0x0000_0080;
        /// Background thread (does not keep the process alive)
        const BACKGROUND = 0x0000_0200;
        /// Created but never started
        const UNSTARTED = 0x0000_0400;
        /// The thread has finished
        const DEAD = 0x0000_0800;
        /// Running in a COM single-threaded apartment
        const IN_STA = 0x0000_4000;
        /// Running in the COM multi-threaded apartment
        const IN_MTA = 0x0000_8000;
    }
}

/// One managed thread of the target.
#[derive(Debug, Clone)]
pub struct ClrThread {
    address: u64,
    os_thread_id: u32,
    managed_thread_id: u32,
    domain: u64,
    lock_count: u32,
    teb: u64,
    stack_base: u64,
    stack_limit: u64,
    state: ThreadState,
}

impl ClrThread {
    pub(crate) fn from_data(data: &ThreadData) -> Self {
        ClrThread {
            address: data.address,
            os_thread_id: data.os_thread_id,
            managed_thread_id: data.managed_thread_id,
            domain: data.domain,
            lock_count: data.lock_count,
            teb: data.teb,
            stack_base: data.stack_base,
            stack_limit: data.stack_limit,
            state: ThreadState::from_bits_retain(data.state),
        }
    }

    /// Thread object address, the identity the lock records store.
    #[must_use]
    pub fn address(&self) -> u64 {
        self.address
    }

    /// OS thread id.
    #[must_use]
    pub fn os_thread_id(&self) -> u32 {
        self.os_thread_id
    }

    /// Managed thread id, as `Thread.ManagedThreadId` reports it. Thin locks
    /// and reader-writer lock records store this id.
    #[must_use]
    pub fn managed_thread_id(&self) -> u32 {
        self.managed_thread_id
    }

    /// Address of the AppDomain the thread is currently executing in.
    #[must_use]
    pub fn domain(&self) -> u64 {
        self.domain
    }

    /// Number of locks the runtime believes the thread holds.
    #[must_use]
    pub fn lock_count(&self) -> u32 {
        self.lock_count
    }

    /// TEB address; 0 on non-Windows targets.
    #[must_use]
    pub fn teb(&self) -> u64 {
        self.teb
    }

    /// Stack base (highest address of the stack span).
    #[must_use]
    pub fn stack_base(&self) -> u64 {
        self.stack_base
    }

    /// Stack limit (lowest address of the stack span).
    #[must_use]
    pub fn stack_limit(&self) -> u64 {
        self.stack_limit
    }

    /// Raw scheduler state bits.
    #[must_use]
    pub fn state(&self) -> ThreadState {
        self.state
    }

    /// Whether the thread has started and not yet died.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self
            .state
            .intersects(ThreadState::DEAD | ThreadState::UNSTARTED)
    }

    /// Whether the thread is a background thread.
    #[must_use]
    pub fn is_background(&self) -> bool {
        self.state.contains(ThreadState::BACKGROUND)
    }
}

/// Walk the thread store's intrusive list into a vector.
///
/// Bounded by the store's reported count (with slack) and a hard cap;
/// already-seen addresses terminate the walk early.
pub(crate) fn enumerate_threads(dac: &dyn DacInterface) -> Vec<ClrThread> {
    let store = match dac.thread_store_data() {
        Ok(store) => store,
        Err(err) => {
            warn!(%err, "thread store unavailable; no threads reported");
            return Vec::new();
        }
    };

    let limit = (store.thread_count as usize)
        .saturating_mul(2)
        .clamp(16, MAX_THREADS);
    let mut seen = HashSet::new();
    let mut threads = Vec::new();
    let mut address = store.first_thread;
    while address != 0 && threads.len() < limit && seen.insert(address) {
        let Ok(data) = dac.thread_data(address) else {
            break;
        };
        threads.push(ClrThread::from_data(&data));
        address = data.next;
    }
    threads
}
