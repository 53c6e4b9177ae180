//! Hierarchy-configuration builders.
//!
//! Tests describe hierarchies directly as Rust values rather than JSON;
//! these helpers keep the module literals short. All shapes share a 64-byte
//! block size unless stated otherwise.

use std::collections::HashMap;

use memsim_core::{
    AddressRange, CacheGeometry, CachePolicy, HierarchyConfig, ModuleConfig, ModuleKind,
};

/// A geometry with LRU replacement and the default port count.
pub fn geometry(sets: u32, assoc: u32, block_size: u64, latency: u64) -> CacheGeometry {
    CacheGeometry {
        sets,
        assoc,
        block_size,
        latency,
        policy: CachePolicy::Lru,
        ports: 2,
    }
}

/// A cache module referencing `geometry` and missing to `low_modules`.
pub fn cache(name: &str, geometry: &str, low_modules: &[&str]) -> ModuleConfig {
    ModuleConfig {
        name: name.to_owned(),
        kind: ModuleKind::Cache,
        geometry: Some(geometry.to_owned()),
        block_size: None,
        latency: None,
        ports: None,
        directory_sets: None,
        directory_assoc: None,
        low_modules: low_modules.iter().map(|&n| n.to_owned()).collect(),
        address_range: AddressRange::All,
    }
}

/// A main-memory module with a small directory suited to tests.
pub fn main_memory(name: &str, block_size: u64, latency: u64) -> ModuleConfig {
    ModuleConfig {
        name: name.to_owned(),
        kind: ModuleKind::MainMemory,
        geometry: None,
        block_size: Some(block_size),
        latency: Some(latency),
        ports: None,
        directory_sets: Some(128),
        directory_assoc: Some(4),
        low_modules: Vec::new(),
        address_range: AddressRange::All,
    }
}

/// A local-memory module with `ports` ports.
pub fn local_memory(name: &str, block_size: u64, latency: u64, ports: u32) -> ModuleConfig {
    ModuleConfig {
        name: name.to_owned(),
        kind: ModuleKind::LocalMemory,
        geometry: None,
        block_size: Some(block_size),
        latency: Some(latency),
        ports: Some(ports),
        directory_sets: None,
        directory_assoc: None,
        low_modules: Vec::new(),
        address_range: AddressRange::All,
    }
}

fn hierarchy(
    geometries: &[(&str, CacheGeometry)],
    modules: Vec<ModuleConfig>,
) -> HierarchyConfig {
    HierarchyConfig {
        frequency_mhz: 1000,
        peer_transfers: true,
        geometries: geometries
            .iter()
            .map(|(n, g)| ((*n).to_owned(), g.clone()))
            .collect::<HashMap<_, _>>(),
        modules,
    }
}

/// Two private L1s over a shared L2 over main memory.
///
/// Module names: `l1-0`, `l1-1`, `l2`, `mm`. Main-memory latency is kept
/// low so coherence tests stay fast.
pub fn two_l1_hierarchy() -> HierarchyConfig {
    hierarchy(
        &[
            ("l1", geometry(16, 2, 64, 1)),
            ("l2", geometry(64, 4, 64, 4)),
        ],
        vec![
            cache("l1-0", "l1", &["l2"]),
            cache("l1-1", "l1", &["l2"]),
            cache("l2", "l2", &["mm"]),
            main_memory("mm", 64, 20),
        ],
    )
}

/// A two-way single-set L1 with FIFO replacement over main memory, so
/// victim choice depends only on fill order. Module names: `l1`, `mm`.
pub fn fifo_l1_hierarchy() -> HierarchyConfig {
    let mut l1 = geometry(1, 2, 64, 1);
    l1.policy = CachePolicy::Fifo;
    hierarchy(
        &[("l1", l1)],
        vec![cache("l1", "l1", &["mm"]), main_memory("mm", 64, 20)],
    )
}

/// One L1 directly over main memory. Module names: `l1`, `mm`.
pub fn single_l1_hierarchy() -> HierarchyConfig {
    hierarchy(
        &[("l1", geometry(16, 2, 64, 1))],
        vec![cache("l1", "l1", &["mm"]), main_memory("mm", 64, 20)],
    )
}

/// A direct-mapped single-set L1 over L2 over main memory, where every
/// block maps to the same way. Module names: `l1`, `l2`, `mm`.
pub fn conflict_hierarchy() -> HierarchyConfig {
    hierarchy(
        &[
            ("l1", geometry(1, 1, 64, 1)),
            ("l2", geometry(64, 4, 64, 4)),
        ],
        vec![
            cache("l1", "l1", &["l2"]),
            cache("l2", "l2", &["mm"]),
            main_memory("mm", 64, 20),
        ],
    )
}

/// A standalone scratchpad. Module name: `lm`.
pub fn local_memory_hierarchy(latency: u64, ports: u32) -> HierarchyConfig {
    hierarchy(&[], vec![local_memory("lm", 64, latency, ports)])
}
