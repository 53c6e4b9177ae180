//! Configuration for the memory hierarchy.
//!
//! This module defines all structures used to describe a hierarchy before
//! construction. It provides:
//! 1. **Defaults:** Baseline constants (ports, latencies, link width, clock).
//! 2. **Structures:** Cache geometries, module descriptions, and the
//!    top-level [`HierarchyConfig`].
//! 3. **Validation:** [`HierarchyConfig::validate`] rejects malformed
//!    hierarchies (overlapping ranges, zero ports, unknown references)
//!    before any module is built; a bad configuration aborts startup.
//!
//! Configuration derives `Deserialize`, so hierarchies can be described in
//! JSON, or built directly in Rust for tests.

use std::collections::HashMap;

use serde::Deserialize;
use thiserror::Error;

/// Default configuration constants for the hierarchy.
pub mod defaults {
    /// Default frequency of the memory-system clock domain, in MHz.
    pub const FREQUENCY_MHZ: u64 = 1000;

    /// Default number of ports per module.
    pub const PORTS: u32 = 2;

    /// Default access latency for main-memory modules, in cycles.
    pub const MAIN_MEMORY_LATENCY: u64 = 200;

    /// Default directory sets for main-memory modules.
    pub const MAIN_MEMORY_DIR_SETS: u32 = 1024;

    /// Default directory associativity for main-memory modules.
    pub const MAIN_MEMORY_DIR_ASSOC: u32 = 4;

    /// Link width in bytes between adjacent modules; reply transfer delays
    /// are charged as one cycle per `LINK_WIDTH` bytes.
    pub const LINK_WIDTH: u64 = 8;

    /// Protocol message header size in bytes, added to every transfer.
    pub const MESSAGE_HEADER: u64 = 8;
}

/// Kind of module in the hierarchy graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    /// Coherent cache level; owns a cache array and a directory.
    Cache,
    /// Backing store; always holds every block it serves, owns the
    /// bottom-level directory.
    MainMemory,
    /// Scratchpad with port/latency modeling but no coherence.
    LocalMemory,
}

/// Replacement policy of a cache level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Least Recently Used; promoted on every access.
    #[default]
    Lru,
    /// First-In First-Out; never reorders on access.
    Fifo,
    /// Uniform random victim selection.
    Random,
}

/// Geometry shared by cache modules referencing it by name.
#[derive(Clone, Debug, Deserialize)]
pub struct CacheGeometry {
    /// Number of sets; must be a power of two.
    pub sets: u32,
    /// Ways per set.
    pub assoc: u32,
    /// Block size in bytes; must be a power of two.
    pub block_size: u64,
    /// Access latency in cycles.
    pub latency: u64,
    /// Replacement policy.
    #[serde(default)]
    pub policy: CachePolicy,
    /// Number of ports.
    #[serde(default = "default_ports")]
    pub ports: u32,
}

fn default_ports() -> u32 {
    defaults::PORTS
}

const fn default_true() -> bool {
    true
}

fn default_frequency() -> u64 {
    defaults::FREQUENCY_MHZ
}

/// Address range served by a module, fixed at configuration time.
///
/// Routing must be static and non-overlapping among the low modules of any
/// one module: exactly one low module serves each address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AddressRange {
    /// Serves the whole address space.
    #[default]
    All,
    /// Serves the contiguous range `low..=high`.
    Bounds {
        /// Lowest served address.
        low: u64,
        /// Highest served address (inclusive).
        high: u64,
    },
    /// Serves addresses with `(addr / divisor) % modulus == remainder`.
    Interleaved {
        /// Number of interleaved peers.
        modulus: u64,
        /// Granularity of interleaving in bytes.
        divisor: u64,
        /// This module's slice.
        remainder: u64,
    },
}

impl AddressRange {
    /// Whether `addr` falls in this range.
    pub fn serves(&self, addr: u64) -> bool {
        match *self {
            Self::All => true,
            Self::Bounds { low, high } => (low..=high).contains(&addr),
            Self::Interleaved {
                modulus,
                divisor,
                remainder,
            } => (addr / divisor) % modulus == remainder,
        }
    }
}

/// Description of one module in the hierarchy.
#[derive(Clone, Debug, Deserialize)]
pub struct ModuleConfig {
    /// Unique module name.
    pub name: String,
    /// Module kind.
    pub kind: ModuleKind,
    /// Geometry reference; required for `Cache` modules.
    #[serde(default)]
    pub geometry: Option<String>,
    /// Block size in bytes; required for `MainMemory` and `LocalMemory`.
    #[serde(default)]
    pub block_size: Option<u64>,
    /// Access latency in cycles; defaults per kind.
    #[serde(default)]
    pub latency: Option<u64>,
    /// Number of ports; defaults to [`defaults::PORTS`].
    #[serde(default)]
    pub ports: Option<u32>,
    /// Directory sets for `MainMemory`; the backing store's directory tracks
    /// this many block groups.
    #[serde(default)]
    pub directory_sets: Option<u32>,
    /// Directory associativity for `MainMemory`.
    #[serde(default)]
    pub directory_assoc: Option<u32>,
    /// Names of the modules directly below this one.
    #[serde(default)]
    pub low_modules: Vec<String>,
    /// Address range served by this module.
    #[serde(default)]
    pub address_range: AddressRange,
}

/// Top-level description of a memory hierarchy.
#[derive(Clone, Debug, Deserialize)]
pub struct HierarchyConfig {
    /// Frequency of the memory-system clock domain, in MHz.
    #[serde(default = "default_frequency")]
    pub frequency_mhz: u64,
    /// Enable direct sibling-to-sibling data transfers (latency optimization
    /// only; never changes final coherence states).
    #[serde(default = "default_true")]
    pub peer_transfers: bool,
    /// Named cache geometries referenced by modules.
    #[serde(default)]
    pub geometries: HashMap<String, CacheGeometry>,
    /// Modules of the hierarchy; order defines [`crate::module::ModuleId`] assignment.
    pub modules: Vec<ModuleConfig>,
}

/// Errors detected while validating a hierarchy description.
///
/// All of these abort startup; none can occur mid-run.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The hierarchy has no modules.
    #[error("hierarchy has no modules")]
    NoModules,

    /// Two modules share a name.
    #[error("duplicate module name '{0}'")]
    DuplicateModule(String),

    /// A cache module does not reference a geometry.
    #[error("cache module '{0}' has no geometry")]
    MissingGeometry(String),

    /// A module references an unknown geometry.
    #[error("module '{module}' references unknown geometry '{geometry}'")]
    UnknownGeometry {
        /// Referencing module.
        module: String,
        /// Unknown geometry name.
        geometry: String,
    },

    /// A module lists an unknown low module.
    #[error("module '{module}' references unknown low module '{low}'")]
    UnknownLowModule {
        /// Referencing module.
        module: String,
        /// Unknown low module name.
        low: String,
    },

    /// A main-memory or local-memory module has no block size.
    #[error("module '{0}' needs an explicit block size")]
    MissingBlockSize(String),

    /// A geometry or module field must be a nonzero power of two.
    #[error("module '{module}': {what} must be a nonzero power of two (={value})")]
    NotPowerOfTwo {
        /// Offending module.
        module: String,
        /// Offending field.
        what: &'static str,
        /// Offending value.
        value: u64,
    },

    /// A module has zero ports or zero associativity.
    #[error("module '{module}': {what} must be nonzero")]
    ZeroField {
        /// Offending module.
        module: String,
        /// Offending field.
        what: &'static str,
    },

    /// A cache module has no low module to miss to.
    #[error("cache module '{0}' has no low module")]
    CacheWithoutLowModule(String),

    /// A local-memory module lists low modules.
    #[error("local-memory module '{0}' cannot have low modules")]
    LocalMemoryWithLowModules(String),

    /// A module's block size exceeds its lower module's.
    #[error("module '{module}' block size {block_size} exceeds low module '{low}' ({low_block_size})")]
    BlockSizeAboveLower {
        /// Higher module.
        module: String,
        /// Higher block size.
        block_size: u64,
        /// Lower module.
        low: String,
        /// Lower block size.
        low_block_size: u64,
    },

    /// Two low modules of one parent serve overlapping bounds.
    #[error("modules '{first}' and '{second}' serve overlapping address ranges")]
    OverlappingRanges {
        /// First module.
        first: String,
        /// Second module.
        second: String,
    },

    /// Interleaved siblings disagree on modulus/divisor or repeat a remainder.
    #[error("modules '{first}' and '{second}' have inconsistent interleaving")]
    InterleaveMismatch {
        /// First module.
        first: String,
        /// Second module.
        second: String,
    },

    /// The clock frequency is out of range.
    #[error("frequency {0} MHz out of range")]
    FrequencyOutOfRange(u64),
}

impl HierarchyConfig {
    /// Checks the hierarchy description for structural errors.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found; a valid result guarantees
    /// [`crate::System::new`] cannot fail on this configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.modules.is_empty() {
            return Err(ConfigError::NoModules);
        }
        if !(1..=crate::engine::MAX_FREQUENCY_MHZ).contains(&self.frequency_mhz) {
            return Err(ConfigError::FrequencyOutOfRange(self.frequency_mhz));
        }

        let mut names: HashMap<&str, &ModuleConfig> = HashMap::new();
        for module in &self.modules {
            if names.insert(module.name.as_str(), module).is_some() {
                return Err(ConfigError::DuplicateModule(module.name.clone()));
            }
        }

        for module in &self.modules {
            self.validate_module(module, &names)?;
        }

        for module in &self.modules {
            Self::validate_routing(module, &names)?;
        }

        Ok(())
    }

    /// Effective block size of `module`, resolving its geometry.
    pub(crate) fn block_size_of(&self, module: &ModuleConfig) -> Option<u64> {
        match module.kind {
            ModuleKind::Cache => module
                .geometry
                .as_deref()
                .and_then(|g| self.geometries.get(g))
                .map(|g| g.block_size),
            ModuleKind::MainMemory | ModuleKind::LocalMemory => module.block_size,
        }
    }

    fn validate_module(
        &self,
        module: &ModuleConfig,
        names: &HashMap<&str, &ModuleConfig>,
    ) -> Result<(), ConfigError> {
        let name = module.name.clone();
        if module.ports == Some(0) {
            return Err(ConfigError::ZeroField {
                module: name,
                what: "ports",
            });
        }

        match module.kind {
            ModuleKind::Cache => {
                let geometry_name = module
                    .geometry
                    .as_deref()
                    .ok_or_else(|| ConfigError::MissingGeometry(name.clone()))?;
                let geometry = self.geometries.get(geometry_name).ok_or_else(|| {
                    ConfigError::UnknownGeometry {
                        module: name.clone(),
                        geometry: geometry_name.to_owned(),
                    }
                })?;
                Self::validate_geometry(&name, geometry)?;
                if module.low_modules.is_empty() {
                    return Err(ConfigError::CacheWithoutLowModule(name));
                }
            }
            ModuleKind::MainMemory | ModuleKind::LocalMemory => {
                let block_size = module
                    .block_size
                    .ok_or_else(|| ConfigError::MissingBlockSize(name.clone()))?;
                if !block_size.is_power_of_two() {
                    return Err(ConfigError::NotPowerOfTwo {
                        module: name,
                        what: "block size",
                        value: block_size,
                    });
                }
                if module.kind == ModuleKind::LocalMemory && !module.low_modules.is_empty() {
                    return Err(ConfigError::LocalMemoryWithLowModules(name));
                }
            }
        }

        let block_size = self.block_size_of(module).unwrap_or(0);
        for low_name in &module.low_modules {
            let low = names
                .get(low_name.as_str())
                .ok_or_else(|| ConfigError::UnknownLowModule {
                    module: module.name.clone(),
                    low: low_name.clone(),
                })?;
            let low_block_size = self.block_size_of(low).unwrap_or(0);
            if low_block_size != 0 && block_size > low_block_size {
                return Err(ConfigError::BlockSizeAboveLower {
                    module: module.name.clone(),
                    block_size,
                    low: low_name.clone(),
                    low_block_size,
                });
            }
        }
        Ok(())
    }

    fn validate_geometry(module: &str, geometry: &CacheGeometry) -> Result<(), ConfigError> {
        if geometry.assoc == 0 {
            return Err(ConfigError::ZeroField {
                module: module.to_owned(),
                what: "associativity",
            });
        }
        if geometry.ports == 0 {
            return Err(ConfigError::ZeroField {
                module: module.to_owned(),
                what: "ports",
            });
        }
        if geometry.sets == 0 || !geometry.sets.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo {
                module: module.to_owned(),
                what: "sets",
                value: u64::from(geometry.sets),
            });
        }
        if geometry.block_size == 0 || !geometry.block_size.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo {
                module: module.to_owned(),
                what: "block size",
                value: geometry.block_size,
            });
        }
        Ok(())
    }

    /// Checks that the low modules of `module` partition the address space:
    /// bounds must not overlap and interleaved siblings must agree on
    /// modulus/divisor with distinct remainders.
    fn validate_routing(
        module: &ModuleConfig,
        names: &HashMap<&str, &ModuleConfig>,
    ) -> Result<(), ConfigError> {
        let lows: Vec<&ModuleConfig> = module
            .low_modules
            .iter()
            .filter_map(|n| names.get(n.as_str()).copied())
            .collect();
        for (i, a) in lows.iter().enumerate() {
            for b in &lows[i + 1..] {
                match (a.address_range, b.address_range) {
                    (
                        AddressRange::Bounds { low: al, high: ah },
                        AddressRange::Bounds { low: bl, high: bh },
                    ) => {
                        if al <= bh && bl <= ah {
                            return Err(ConfigError::OverlappingRanges {
                                first: a.name.clone(),
                                second: b.name.clone(),
                            });
                        }
                    }
                    (
                        AddressRange::Interleaved {
                            modulus: am,
                            divisor: ad,
                            remainder: ar,
                        },
                        AddressRange::Interleaved {
                            modulus: bm,
                            divisor: bd,
                            remainder: br,
                        },
                    ) => {
                        if am != bm || ad != bd || ar == br {
                            return Err(ConfigError::InterleaveMismatch {
                                first: a.name.clone(),
                                second: b.name.clone(),
                            });
                        }
                    }
                    // Any module serving everything next to a sibling overlaps.
                    (AddressRange::All, _) | (_, AddressRange::All) => {
                        return Err(ConfigError::OverlappingRanges {
                            first: a.name.clone(),
                            second: b.name.clone(),
                        });
                    }
                    _ => {
                        return Err(ConfigError::InterleaveMismatch {
                            first: a.name.clone(),
                            second: b.name.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
