//! Discrete-event scheduler with frequency domains.
//!
//! This module implements the logical clock that drives the protocol engine. It provides:
//! 1. **Frequency domains:** Independent logical clocks registered by frequency; the
//!    scheduler keeps global time in picoseconds and derives per-domain cycles.
//! 2. **Event queue:** A binary heap ordered by (time, insertion sequence), so events
//!    for one domain fire in non-decreasing time and same-cycle events fire FIFO.
//! 3. **Cancellation safety:** Events carry an [`AccessId`] whose embedded generation
//!    is re-checked at dispatch; events aimed at a destroyed access are ignored
//!    instead of dereferencing stale state.
//!
//! The scheduler has no domain knowledge: handlers are identified by
//! [`EventKind`] and dispatched by the owning [`System`](crate::System).

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::access::AccessId;
use crate::protocol::EventKind;

/// Maximum accepted domain frequency, in MHz.
pub const MAX_FREQUENCY_MHZ: u64 = 1_000_000;

/// Picoseconds per simulated second over megahertz: cycle time = 10^6 / f ps.
const PS_PER_MHZ_CYCLE: u64 = 1_000_000;

/// Identifier of a frequency domain registered with the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DomainId(pub(crate) usize);

/// A registered logical clock.
#[derive(Debug)]
struct Domain {
    /// Domain frequency in MHz.
    frequency_mhz: u64,
    /// Duration of one cycle in picoseconds.
    cycle_time_ps: u64,
}

/// A scheduled protocol step.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    /// Absolute firing time in picoseconds.
    pub when_ps: u64,
    /// Protocol step to execute.
    pub kind: EventKind,
    /// Access ("stack" frame) the step operates on. The embedded generation
    /// makes stale events detectable after the access is destroyed.
    pub access: AccessId,
    /// Insertion sequence; breaks ties so same-cycle events fire FIFO.
    seq: u64,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.when_ps == other.when_ps && self.seq == other.seq
    }
}

impl Eq for Event {}

impl Ord for Event {
    // Reversed: BinaryHeap is a max-heap, we want the earliest event on top.
    fn cmp(&self, other: &Self) -> Ordering {
        (other.when_ps, other.seq).cmp(&(self.when_ps, self.seq))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Discrete-event scheduler: frequency domains plus a time-ordered event heap.
///
/// Time only advances by popping events; there is no deadline or timeout
/// concept. Handlers may schedule further events, including same-cycle ones,
/// which fire after all previously inserted events of the same cycle.
#[derive(Debug, Default)]
pub struct EventScheduler {
    domains: Vec<Domain>,
    heap: BinaryHeap<Event>,
    time_ps: u64,
    next_seq: u64,
}

impl EventScheduler {
    /// Creates an empty scheduler with no domains at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new frequency domain.
    ///
    /// # Panics
    ///
    /// Panics if `frequency_mhz` is zero or above [`MAX_FREQUENCY_MHZ`]; a
    /// nonsensical frequency is a configuration-time programming error.
    pub fn new_domain(&mut self, frequency_mhz: u64) -> DomainId {
        assert!(
            (1..=MAX_FREQUENCY_MHZ).contains(&frequency_mhz),
            "domain frequency not in range [1, {MAX_FREQUENCY_MHZ}] MHz (={frequency_mhz})"
        );
        self.domains.push(Domain {
            frequency_mhz,
            cycle_time_ps: PS_PER_MHZ_CYCLE / frequency_mhz,
        });
        DomainId(self.domains.len() - 1)
    }

    /// Returns the frequency of `domain` in MHz.
    pub fn frequency(&self, domain: DomainId) -> u64 {
        self.domains[domain.0].frequency_mhz
    }

    /// Returns the current cycle count of `domain`.
    pub fn cycle(&self, domain: DomainId) -> u64 {
        self.time_ps / self.domains[domain.0].cycle_time_ps
    }

    /// Current global time in picoseconds.
    pub fn time_ps(&self) -> u64 {
        self.time_ps
    }

    /// Duration of one cycle of `domain` in picoseconds.
    pub fn cycle_time_ps(&self, domain: DomainId) -> u64 {
        self.domains[domain.0].cycle_time_ps
    }

    /// Enqueues `kind` for `access` to fire `delay` cycles of `domain` from now.
    ///
    /// A zero delay fires within the current cycle, after every event already
    /// inserted for it. Events land on cycle boundaries of the domain, never
    /// in the past.
    pub fn schedule(&mut self, domain: DomainId, delay: u64, kind: EventKind, access: AccessId) {
        let cycle_time = self.domains[domain.0].cycle_time_ps;
        let boundary = (self.time_ps / cycle_time + delay) * cycle_time;
        let when_ps = boundary.max(self.time_ps);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Event {
            when_ps,
            kind,
            access,
            seq,
        });
    }

    /// Pops the next event, advancing time to its firing point.
    pub fn next_event(&mut self) -> Option<Event> {
        let event = self.heap.pop()?;
        debug_assert!(event.when_ps >= self.time_ps, "event heap went backwards");
        self.time_ps = event.when_ps;
        Some(event)
    }

    /// Peeks at the firing time of the next event without popping it.
    pub fn next_event_time(&self) -> Option<u64> {
        self.heap.peek().map(|e| e.when_ps)
    }

    /// Number of events currently enqueued (including stale ones).
    pub fn in_flight(&self) -> usize {
        self.heap.len()
    }

    /// Whether no events remain.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
