//! AppDomain and module enumeration.
//!
//! The domain graph is read in one pass: system domain, shared domain, then every user
//! domain, each expanded into its assemblies and their modules. Modules are deduplicated by
//! address (domain-neutral assemblies surface the same module from several domains). Every
//! step is failure-tolerant - a domain whose assembly list cannot be read is logged and
//! contributes nothing.

use std::sync::Arc;

use tracing::warn;

use crate::dac::{AppDomainData, DacInterface, ModuleData};

/// One AppDomain of the target.
#[derive(Debug, Clone)]
pub struct AppDomain {
    address: u64,
    id: u32,
    name: Option<String>,
}

impl AppDomain {
    fn from_data(data: &AppDomainData) -> Self {
        AppDomain {
            address: data.address,
            id: data.id,
            name: data.name.clone(),
        }
    }

    /// Domain address, the key for domain-local static storage.
    #[must_use]
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Runtime-assigned domain id.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Friendly name, when the target could produce one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// One loaded module.
#[derive(Debug, Clone)]
pub struct ClrModule {
    address: u64,
    id: u64,
    assembly: u64,
    name: Option<String>,
    is_dynamic: bool,
    is_pe_file: bool,
}

impl ClrModule {
    fn from_data(data: &ModuleData) -> Self {
        ClrModule {
            address: data.address,
            id: data.id,
            assembly: data.assembly,
            name: data.name.clone(),
            is_dynamic: data.is_dynamic,
            is_pe_file: data.is_pe_file,
        }
    }

    /// Module address.
    #[must_use]
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Runtime-assigned module id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Owning assembly address.
    #[must_use]
    pub fn assembly(&self) -> u64 {
        self.assembly
    }

    /// File or reflection name, when resolvable.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether this is a reflection-emit module (no stable metadata tokens).
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.is_dynamic
    }

    /// Whether the module is backed by a PE file on disk.
    #[must_use]
    pub fn is_pe_file(&self) -> bool {
        self.is_pe_file
    }
}

/// The complete domain graph of one revision.
#[derive(Debug, Default)]
pub struct DomainSet {
    /// System domain, when readable
    pub system: Option<AppDomain>,
    /// Shared domain (domain-neutral assemblies), when readable
    pub shared: Option<AppDomain>,
    /// User AppDomains
    pub domains: Vec<Arc<AppDomain>>,
    /// All modules, deduplicated by address
    pub modules: Vec<Arc<ClrModule>>,
}

impl DomainSet {
    /// Read the whole graph. Never fails outright - unreadable pieces are
    /// logged and omitted.
    pub(crate) fn read(dac: &dyn DacInterface) -> Self {
        let mut set = DomainSet::default();

        let store = match dac.app_domain_store_data() {
            Ok(store) => store,
            Err(err) => {
                warn!(%err, "AppDomain store unavailable; domain graph is empty");
                return set;
            }
        };

        set.system = Self::read_domain(dac, store.system_domain);
        set.shared = Self::read_domain(dac, store.shared_domain);

        let mut roots = Vec::new();
        roots.extend([store.system_domain, store.shared_domain]);
        match dac.app_domain_list() {
            Ok(list) => {
                for address in list {
                    roots.push(address);
                    if let Some(domain) = Self::read_domain(dac, address) {
                        set.domains.push(Arc::new(domain));
                    }
                }
            }
            Err(err) => warn!(%err, "AppDomain list unavailable"),
        }

        let mut seen = std::collections::HashSet::new();
        for root in roots {
            if root == 0 {
                continue;
            }
            let Ok(assemblies) = dac.assembly_list(root) else {
                warn!(domain = root, "assembly list unavailable; skipping domain");
                continue;
            };
            for assembly in assemblies {
                let Ok(modules) = dac.module_list(assembly) else {
                    warn!(assembly, "module list unavailable; skipping assembly");
                    continue;
                };
                for module in modules {
                    if !seen.insert(module) {
                        continue;
                    }
                    if let Ok(data) = dac.module_data(module) {
                        set.modules.push(Arc::new(ClrModule::from_data(&data)));
                    }
                }
            }
        }

        set
    }

    fn read_domain(dac: &dyn DacInterface, address: u64) -> Option<AppDomain> {
        if address == 0 {
            return None;
        }
        dac.app_domain_data(address)
            .ok()
            .map(|data| AppDomain::from_data(&data))
    }

    /// Find a domain by address, checking system and shared as well.
    #[must_use]
    pub fn domain_by_address(&self, address: u64) -> Option<&AppDomain> {
        if let Some(system) = &self.system {
            if system.address() == address {
                return Some(system);
            }
        }
        if let Some(shared) = &self.shared {
            if shared.address() == address {
                return Some(shared);
            }
        }
        self.domains
            .iter()
            .map(Arc::as_ref)
            .find(|d| d.address() == address)
    }
}
