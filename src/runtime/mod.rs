//! The session root: revision control and target-level caches.
//!
//! [`ClrRuntime`] is the entry point of the crate. It owns the DAC handle, the monotone
//! revision counter, and one cache slot per expensive view (heap, domain graph, thread
//! list). [`ClrRuntime::flush`] drops every cache and bumps the revision; anything resolved
//! before the flush fails loudly with [`crate::Error::RevisionMismatch`] instead of
//! answering from a stale snapshot.
//!
//! # Architecture
//!
//! - Bootstrap happens in [`ClrRuntime::new`]: the well-known method tables are fetched
//!   once to prove the DAC channel works. That failure is the only fatal one; every later
//!   request degrades locally.
//! - Views are built lazily and shared as `Arc`s. The heap carries its own copy of the
//!   revision counter so its records can validate themselves without a back-reference.
//!
//! # Usage Examples
//!
//! ```rust,ignore
//! let runtime = ClrRuntime::new(dac, AbiProfile::new(ClrVersion::V45, PointerWidth::Bits64))?;
//! let heap = runtime.heap()?;
//! for ty in heap.enumerate_types()? {
//!     println!("{}", ty.name());
//! }
//! runtime.flush(); // target resumed and re-stopped: all views are stale now
//! ```

pub mod domains;
pub mod threadpool;
pub mod threads;

pub use domains::{AppDomain, ClrModule, DomainSet};
pub use threadpool::{ClrThreadPool, WorkRequest};
pub use threads::{ClrThread, ThreadState};

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, Mutex,
};

use tracing::debug;

use crate::{
    dac::{AbiProfile, DacInterface},
    heap::ClrHeap,
    lock::LockSnapshot,
    Error, Result,
};

/// A diagnostics session over one stopped CLR target.
pub struct ClrRuntime {
    dac: Arc<dyn DacInterface>,
    abi: AbiProfile,
    current: Arc<AtomicU32>,
    heap: Mutex<Option<Arc<ClrHeap>>>,
    domains: Mutex<Option<Arc<DomainSet>>>,
    threads: Mutex<Option<Arc<Vec<Arc<ClrThread>>>>>,
}

impl ClrRuntime {
    /// Open a session against `dac`, decoding with the layouts `abi` selects.
    ///
    /// # Errors
    /// Returns [`Error::Dac`] when the bootstrap request for the well-known
    /// method tables fails - without those the session is unusable.
    pub fn new(dac: Arc<dyn DacInterface>, abi: AbiProfile) -> Result<Self> {
        match dac.common_method_tables() {
            Ok(common) => {
                debug!(
                    object = common.object,
                    string = common.string,
                    "session bootstrap complete"
                );
            }
            Err(Error::Dac { hr, context }) => return Err(Error::Dac { hr, context }),
            Err(_) => {
                return Err(Error::Dac {
                    hr: -1,
                    context: "well-known method table bootstrap",
                })
            }
        }

        Ok(ClrRuntime {
            dac,
            abi,
            current: Arc::new(AtomicU32::new(0)),
            heap: Mutex::new(None),
            domains: Mutex::new(None),
            threads: Mutex::new(None),
        })
    }

    /// The session's layout tables.
    #[must_use]
    pub fn abi(&self) -> &AbiProfile {
        &self.abi
    }

    /// Current revision number. Bumped by every [`Self::flush`].
    #[must_use]
    pub fn revision(&self) -> u32 {
        self.current.load(Ordering::Acquire)
    }

    /// Invalidate every cached view and advance the revision.
    ///
    /// Call after the target has run and stopped again. Views and type
    /// records obtained before the flush keep their old stamp and fail with
    /// [`Error::RevisionMismatch`] on next use.
    pub fn flush(&self) {
        *lock!(self.heap) = None;
        *lock!(self.domains) = None;
        *lock!(self.threads) = None;
        let old = self.current.fetch_add(1, Ordering::AcqRel);
        debug!(from = old, to = old + 1, "session flushed");
    }

    /// The GC heap view for the current revision, built on first use.
    ///
    /// # Errors
    /// Returns [`Error::Dac`] if the heap's own bootstrap request fails.
    pub fn heap(&self) -> Result<Arc<ClrHeap>> {
        let mut slot = lock!(self.heap);
        if let Some(heap) = slot.as_ref() {
            return Ok(Arc::clone(heap));
        }
        let heap = Arc::new(ClrHeap::new(
            Arc::clone(&self.dac),
            self.abi,
            self.current.load(Ordering::Acquire),
            Arc::clone(&self.current),
        )?);
        *slot = Some(Arc::clone(&heap));
        Ok(heap)
    }

    /// The domain graph for the current revision, built on first use.
    /// Unreadable pieces degrade to omissions, never errors.
    #[must_use]
    pub fn app_domains(&self) -> Arc<DomainSet> {
        let mut slot = lock!(self.domains);
        if let Some(set) = slot.as_ref() {
            return Arc::clone(set);
        }
        let set = Arc::new(DomainSet::read(self.dac.as_ref()));
        *slot = Some(Arc::clone(&set));
        set
    }

    /// All loaded modules, deduplicated by address.
    #[must_use]
    pub fn modules(&self) -> Vec<Arc<ClrModule>> {
        self.app_domains().modules.clone()
    }

    /// The managed thread list for the current revision, built on first use.
    #[must_use]
    pub fn threads(&self) -> Arc<Vec<Arc<ClrThread>>> {
        let mut slot = lock!(self.threads);
        if let Some(threads) = slot.as_ref() {
            return Arc::clone(threads);
        }
        let threads = Arc::new(
            threads::enumerate_threads(self.dac.as_ref())
                .into_iter()
                .map(Arc::new)
                .collect::<Vec<_>>(),
        );
        *slot = Some(Arc::clone(&threads));
        threads
    }

    /// Snapshot of the CLR thread pool and its queued work requests.
    ///
    /// # Errors
    /// Returns an error when the pool counters cannot be fetched.
    pub fn thread_pool(&self) -> Result<ClrThreadPool> {
        let data = self.dac.thread_pool_data()?;
        Ok(ClrThreadPool::read(self.dac.as_ref(), &data))
    }

    /// Triangulated lock state: every known lock object with its owners,
    /// waiters, and best-guess wait reasons. Built once per heap view.
    ///
    /// # Errors
    /// Returns [`Error::Dac`] if the heap bootstrap fails, or
    /// [`Error::RevisionMismatch`] if the session was flushed mid-call.
    pub fn blocking_objects(&self) -> Result<Arc<LockSnapshot>> {
        let heap = self.heap()?;
        let threads = self.threads();
        heap.blocking_objects(&threads)
    }
}

impl std::fmt::Debug for ClrRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClrRuntime")
            .field("revision", &self.revision())
            .field("abi", &self.abi)
            .finish_non_exhaustive()
    }
}
