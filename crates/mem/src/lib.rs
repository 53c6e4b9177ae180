//! Cycle-level simulator for multi-level cache hierarchies kept coherent by
//! the NMOESI protocol.
//!
//! The crate models a configurable tree of cache modules over a main-memory
//! backing store. Every memory operation runs as a chain of discrete events
//! on a picosecond-resolution scheduler: directory locks serialize conflicting
//! accesses per `(set, way)`, read and write requests travel up-down and
//! down-up between levels, evictions write dirty victims back, and
//! invalidations fan out over per-sub-block sharer bitmaps.
//!
//! # Example
//!
//! ```
//! use memsim_core::{AccessKind, HierarchyConfig, System};
//!
//! let config: HierarchyConfig = serde_json::from_str(
//!     r#"{
//!       "geometries": { "l1": { "sets": 16, "assoc": 2, "block_size": 64, "latency": 1 } },
//!       "modules": [
//!         { "name": "l1-0", "kind": "cache", "geometry": "l1", "low_modules": ["mm"] },
//!         { "name": "mm", "kind": "main_memory", "block_size": 64 }
//!       ]
//!     }"#,
//! )
//! .unwrap();
//! let mut system = System::new(&config).unwrap();
//! let l1 = system.module_id("l1-0").unwrap();
//! let _ = system.access(l1, AccessKind::Store, 0x100, 42, None, None);
//! system.run_until_idle();
//! assert_eq!(system.read_word(0x100), 42);
//! ```

pub mod access;
pub mod cache;
pub mod config;
pub mod directory;
pub mod engine;
pub mod module;
pub mod protocol;
pub mod stats;
pub mod system;

pub use access::{AccessKind, CompletionFn, Witness};
pub use cache::BlockState;
pub use config::{
    AddressRange, CacheGeometry, CachePolicy, ConfigError, HierarchyConfig, ModuleConfig,
    ModuleKind,
};
pub use module::ModuleId;
pub use stats::ModuleStats;
pub use system::System;
