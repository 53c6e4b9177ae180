//! Per-module access statistics.

use std::fmt;

use crate::access::AccessKind;

/// Counters accumulated by one module over a run.
///
/// Retried attempts are folded into a single logical access: the retry
/// counters record how many attempts bounced, while `no_retry_*` counters
/// cover only accesses that succeeded on their first attempt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ModuleStats {
    /// Total accesses of any kind.
    pub accesses: u64,
    /// Accesses that hit.
    pub hits: u64,

    /// Load accesses.
    pub reads: u64,
    /// Load accesses that hit.
    pub read_hits: u64,
    /// Loads arriving over a down-up path.
    pub blocking_reads: u64,
    /// Loads arriving over an up-down path.
    pub non_blocking_reads: u64,

    /// Store accesses.
    pub writes: u64,
    /// Store accesses that hit.
    pub write_hits: u64,
    /// Stores arriving over a down-up path.
    pub blocking_writes: u64,
    /// Stores arriving over an up-down path.
    pub non_blocking_writes: u64,

    /// Non-coherent store accesses.
    pub nc_writes: u64,
    /// Non-coherent stores that hit.
    pub nc_write_hits: u64,

    /// Load attempts that bounced off a held directory lock.
    pub read_retries: u64,
    /// Store attempts that bounced off a held directory lock.
    pub write_retries: u64,
    /// Non-coherent store attempts that bounced off a held directory lock.
    pub nc_write_retries: u64,

    /// Accesses that completed without ever retrying.
    pub no_retry_accesses: u64,
    /// First-attempt accesses that hit.
    pub no_retry_hits: u64,

    /// Blocks evicted to make room.
    pub evictions: u64,

    /// Loads that coalesced onto an in-flight access.
    pub coalesced_reads: u64,
    /// Stores that coalesced onto an in-flight access.
    pub coalesced_writes: u64,

    /// Directory locks acquired immediately.
    pub dir_lock_acquisitions: u64,
    /// Directory lock attempts that found the lock held.
    pub dir_lock_contentions: u64,
}

impl ModuleStats {
    /// Records the hit/miss outcome of one attempt of `kind`.
    pub fn record_attempt(&mut self, kind: AccessKind, hit: bool, retried: bool) {
        self.accesses += 1;
        self.hits += u64::from(hit);
        match kind {
            AccessKind::Load => {
                self.reads += 1;
                self.read_hits += u64::from(hit);
            }
            AccessKind::Store => {
                self.writes += 1;
                self.write_hits += u64::from(hit);
            }
            AccessKind::NcStore => {
                self.nc_writes += 1;
                self.nc_write_hits += u64::from(hit);
            }
        }
        if !retried {
            self.no_retry_accesses += 1;
            self.no_retry_hits += u64::from(hit);
        }
    }

    /// Records a bounced attempt of `kind`.
    pub fn record_retry(&mut self, kind: AccessKind) {
        match kind {
            AccessKind::Load => self.read_retries += 1,
            AccessKind::Store => self.write_retries += 1,
            AccessKind::NcStore => self.nc_write_retries += 1,
        }
    }

    /// Records an access that piggybacked on an in-flight one.
    pub fn record_coalesce(&mut self, kind: AccessKind) {
        match kind {
            AccessKind::Load => self.coalesced_reads += 1,
            AccessKind::Store | AccessKind::NcStore => self.coalesced_writes += 1,
        }
    }

    /// Hit rate over all accesses, in `0.0..=1.0`.
    pub fn hit_rate(&self) -> f64 {
        if self.accesses == 0 {
            return 0.0;
        }
        self.hits as f64 / self.accesses as f64
    }
}

impl fmt::Display for ModuleStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "accesses = {}", self.accesses)?;
        writeln!(f, "hits = {} ({:.4})", self.hits, self.hit_rate())?;
        writeln!(f, "reads = {} (hits {})", self.reads, self.read_hits)?;
        writeln!(f, "writes = {} (hits {})", self.writes, self.write_hits)?;
        writeln!(f, "nc_writes = {} (hits {})", self.nc_writes, self.nc_write_hits)?;
        writeln!(
            f,
            "retries = {} read / {} write / {} nc_write",
            self.read_retries, self.write_retries, self.nc_write_retries
        )?;
        writeln!(f, "evictions = {}", self.evictions)?;
        writeln!(
            f,
            "coalesced = {} read / {} write",
            self.coalesced_reads, self.coalesced_writes
        )
    }
}
