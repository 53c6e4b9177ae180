//! # Configuration Tests
//!
//! Tests for hierarchy deserialization, defaults, and validation.

use memsim_core::config::defaults;
use memsim_core::{AddressRange, CachePolicy, ConfigError, HierarchyConfig, System};
use pretty_assertions::assert_eq;
use rstest::rstest;

use crate::common::builder;

// ══════════════════════════════════════════════════════════
// 1. Deserialization and defaults
// ══════════════════════════════════════════════════════════

#[test]
fn deserialize_minimal_hierarchy() {
    let config: HierarchyConfig = serde_json::from_str(
        r#"{
            "geometries": {
                "l1": { "sets": 16, "assoc": 2, "block_size": 64, "latency": 1 }
            },
            "modules": [
                { "name": "l1", "kind": "cache", "geometry": "l1",
                  "low_modules": ["mm"] },
                { "name": "mm", "kind": "main_memory", "block_size": 64 }
            ]
        }"#,
    )
    .expect("minimal hierarchy must parse");

    assert_eq!(config.frequency_mhz, defaults::FREQUENCY_MHZ);
    assert!(config.peer_transfers);
    let l1 = &config.geometries["l1"];
    assert_eq!(l1.policy, CachePolicy::Lru);
    assert_eq!(l1.ports, defaults::PORTS);
    assert!(config.validate().is_ok());
}

#[test]
fn deserialize_address_ranges() {
    let range: AddressRange =
        serde_json::from_str(r#"{ "kind": "bounds", "low": 0, "high": 4095 }"#).unwrap();
    assert_eq!(
        range,
        AddressRange::Bounds {
            low: 0,
            high: 4095
        }
    );

    let range: AddressRange = serde_json::from_str(
        r#"{ "kind": "interleaved", "modulus": 2, "divisor": 64, "remainder": 1 }"#,
    )
    .unwrap();
    assert_eq!(
        range,
        AddressRange::Interleaved {
            modulus: 2,
            divisor: 64,
            remainder: 1
        }
    );
}

#[rstest]
#[case(AddressRange::All, 0x1234, true)]
#[case(AddressRange::Bounds { low: 0x1000, high: 0x1fff }, 0x1234, true)]
#[case(AddressRange::Bounds { low: 0x1000, high: 0x1fff }, 0x2000, false)]
#[case(AddressRange::Interleaved { modulus: 2, divisor: 64, remainder: 0 }, 0x40, false)]
#[case(AddressRange::Interleaved { modulus: 2, divisor: 64, remainder: 0 }, 0x80, true)]
fn address_range_membership(
    #[case] range: AddressRange,
    #[case] addr: u64,
    #[case] served: bool,
) {
    assert_eq!(range.serves(addr), served);
}

// ══════════════════════════════════════════════════════════
// 2. Validation failures
// ══════════════════════════════════════════════════════════

#[test]
fn reject_empty_hierarchy() {
    let config = HierarchyConfig {
        frequency_mhz: 1000,
        peer_transfers: true,
        geometries: std::collections::HashMap::new(),
        modules: Vec::new(),
    };
    assert!(matches!(config.validate(), Err(ConfigError::NoModules)));
}

#[test]
fn reject_duplicate_module_names() {
    let mut config = builder::single_l1_hierarchy();
    config.modules.push(builder::main_memory("mm", 64, 20));
    assert!(matches!(
        config.validate(),
        Err(ConfigError::DuplicateModule(name)) if name == "mm"
    ));
}

#[test]
fn reject_unknown_geometry() {
    let mut config = builder::single_l1_hierarchy();
    config.modules[0].geometry = Some("l9".to_owned());
    assert!(matches!(
        config.validate(),
        Err(ConfigError::UnknownGeometry { geometry, .. }) if geometry == "l9"
    ));
}

#[test]
fn reject_cache_without_low_module() {
    let mut config = builder::single_l1_hierarchy();
    config.modules[0].low_modules.clear();
    assert!(matches!(
        config.validate(),
        Err(ConfigError::CacheWithoutLowModule(name)) if name == "l1"
    ));
}

#[test]
fn reject_unknown_low_module() {
    let mut config = builder::single_l1_hierarchy();
    config.modules[0].low_modules = vec!["nowhere".to_owned()];
    assert!(matches!(
        config.validate(),
        Err(ConfigError::UnknownLowModule { low, .. }) if low == "nowhere"
    ));
}

#[test]
fn reject_non_power_of_two_sets() {
    let mut config = builder::single_l1_hierarchy();
    config
        .geometries
        .get_mut("l1")
        .expect("geometry exists")
        .sets = 3;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::NotPowerOfTwo { what: "sets", .. })
    ));
}

#[test]
fn reject_zero_ports() {
    let mut config = builder::single_l1_hierarchy();
    config
        .geometries
        .get_mut("l1")
        .expect("geometry exists")
        .ports = 0;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::ZeroField { what: "ports", .. })
    ));
}

#[test]
fn reject_missing_block_size() {
    let mut config = builder::single_l1_hierarchy();
    config.modules[1].block_size = None;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::MissingBlockSize(name)) if name == "mm"
    ));
}

#[test]
fn reject_block_size_above_lower_level() {
    let mut config = builder::single_l1_hierarchy();
    config
        .geometries
        .get_mut("l1")
        .expect("geometry exists")
        .block_size = 128;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::BlockSizeAboveLower { block_size: 128, .. })
    ));
}

#[test]
fn reject_local_memory_with_low_modules() {
    let mut config = builder::local_memory_hierarchy(4, 1);
    config.modules[0].low_modules = vec!["lm".to_owned()];
    assert!(matches!(
        config.validate(),
        Err(ConfigError::LocalMemoryWithLowModules(_))
    ));
}

#[test]
fn reject_frequency_out_of_range() {
    let mut config = builder::single_l1_hierarchy();
    config.frequency_mhz = 0;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::FrequencyOutOfRange(0))
    ));
}

// ══════════════════════════════════════════════════════════
// 3. Sibling routing partition
// ══════════════════════════════════════════════════════════

#[test]
fn reject_overlapping_bounds() {
    let mut config = builder::two_l1_hierarchy();
    // Split main memory into two banks below l2, with overlapping windows.
    config.modules.push(builder::main_memory("mm-1", 64, 20));
    let l2 = config
        .modules
        .iter_mut()
        .find(|m| m.name == "l2")
        .expect("l2 exists");
    l2.low_modules = vec!["mm".to_owned(), "mm-1".to_owned()];
    for (name, low, high) in [("mm", 0, 0xffff), ("mm-1", 0x8000, 0x1_ffff)] {
        let bank = config
            .modules
            .iter_mut()
            .find(|m| m.name == name)
            .expect("bank exists");
        bank.address_range = AddressRange::Bounds { low, high };
    }
    assert!(matches!(
        config.validate(),
        Err(ConfigError::OverlappingRanges { .. })
    ));
}

#[test]
fn reject_inconsistent_interleaving() {
    let mut config = builder::two_l1_hierarchy();
    config.modules.push(builder::main_memory("mm-1", 64, 20));
    let l2 = config
        .modules
        .iter_mut()
        .find(|m| m.name == "l2")
        .expect("l2 exists");
    l2.low_modules = vec!["mm".to_owned(), "mm-1".to_owned()];
    for (name, divisor, remainder) in [("mm", 64, 0), ("mm-1", 128, 1)] {
        let bank = config
            .modules
            .iter_mut()
            .find(|m| m.name == name)
            .expect("bank exists");
        bank.address_range = AddressRange::Interleaved {
            modulus: 2,
            divisor,
            remainder,
        };
    }
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InterleaveMismatch { .. })
    ));
}

#[test]
fn interleaved_banks_route_by_address() {
    let mut config = builder::two_l1_hierarchy();
    config.modules.push(builder::main_memory("mm-1", 64, 20));
    let l2 = config
        .modules
        .iter_mut()
        .find(|m| m.name == "l2")
        .expect("l2 exists");
    l2.low_modules = vec!["mm".to_owned(), "mm-1".to_owned()];
    for (name, remainder) in [("mm", 0), ("mm-1", 1)] {
        let bank = config
            .modules
            .iter_mut()
            .find(|m| m.name == name)
            .expect("bank exists");
        bank.address_range = AddressRange::Interleaved {
            modulus: 2,
            divisor: 64,
            remainder,
        };
    }
    assert!(config.validate().is_ok());

    // Even blocks land in mm, odd blocks in mm-1.
    let mut system = System::new(&config).expect("banked hierarchy builds");
    let l1 = system.module_id("l1-0").expect("l1-0 exists");
    let _ = system.access(
        l1,
        memsim_core::AccessKind::Store,
        0x40,
        7,
        None,
        None,
    );
    system.run_until_idle();
    assert_eq!(system.read_word(0x40), 7);
    let mm1 = system.module_id("mm-1").expect("mm-1 exists");
    assert_eq!(
        system.block_state(mm1, 0x40),
        memsim_core::BlockState::Exclusive
    );
}
