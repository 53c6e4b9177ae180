//! Synchronous access harness.
//!
//! Wraps a [`System`] so tests can issue accesses and read results without
//! wiring completion callbacks by hand. `load`/`store` run the hierarchy to
//! quiescence; the `issue_*` variants only enqueue, letting tests overlap
//! accesses in the same cycle before calling [`Harness::run`].

use std::cell::Cell;
use std::rc::Rc;

use memsim_core::{AccessKind, HierarchyConfig, ModuleId, ModuleStats, System};

/// Sentinel returned by an [`Harness::issue_load`] sink before completion.
pub const PENDING: u64 = u64::MAX;

pub struct Harness {
    pub system: System,
}

impl Harness {
    pub fn new(config: &HierarchyConfig) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        let system = System::new(config).expect("test hierarchy must be valid");
        Self { system }
    }

    /// Resolves a module name; panics on unknown names.
    pub fn module(&self, name: &str) -> ModuleId {
        self.system
            .module_id(name)
            .unwrap_or_else(|| panic!("no module named '{name}'"))
    }

    pub fn stats(&self, name: &str) -> &ModuleStats {
        self.system.stats(self.module(name))
    }

    /// Issues a load without running; the returned cell holds [`PENDING`]
    /// until the access completes.
    pub fn issue_load(&mut self, module: ModuleId, addr: u64) -> Rc<Cell<u64>> {
        let out = Rc::new(Cell::new(PENDING));
        let sink = Rc::clone(&out);
        let _ = self.system.access(
            module,
            AccessKind::Load,
            addr,
            0,
            None,
            Some(Box::new(move |value| sink.set(value))),
        );
        out
    }

    pub fn issue_store(&mut self, module: ModuleId, addr: u64, value: u64) {
        let _ = self
            .system
            .access(module, AccessKind::Store, addr, value, None, None);
    }

    pub fn issue_nc_store(&mut self, module: ModuleId, addr: u64, value: u64) {
        let _ = self
            .system
            .access(module, AccessKind::NcStore, addr, value, None, None);
    }

    /// Issues a load and runs until the hierarchy is idle.
    pub fn load(&mut self, module: ModuleId, addr: u64) -> u64 {
        let out = self.issue_load(module, addr);
        self.run();
        assert_ne!(out.get(), PENDING, "load never completed");
        out.get()
    }

    /// Issues a store and runs until the hierarchy is idle.
    pub fn store(&mut self, module: ModuleId, addr: u64, value: u64) {
        self.issue_store(module, addr, value);
        self.run();
    }

    /// Issues a non-coherent store and runs until the hierarchy is idle.
    pub fn nc_store(&mut self, module: ModuleId, addr: u64, value: u64) {
        self.issue_nc_store(module, addr, value);
        self.run();
    }

    pub fn run(&mut self) {
        self.system.run_until_idle();
        assert_eq!(self.system.in_flight(), 0, "accesses left in flight");
    }
}
