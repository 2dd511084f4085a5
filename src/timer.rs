//! The worker-owned timer set.
//!
//! Expired timers are converted into the same dispatch thunks ordinary messages use, so
//! the worker loop has one code path for "apply this closure to the object" regardless
//! of whether the closure came from a `send` or from a timer firing. The set itself is
//! only ever touched by the worker thread: `timer_start`/`timer_stop` issued off-thread
//! are routed through the mailbox as control envelopes (see `handle.rs`) and applied
//! here once the worker dequeues them.

use std::any::{Any, TypeId};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use crate::context::{ActiveObject, Context, Handles};

/// Whether a timer re-arms after firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    /// Fires once, then removes itself before its handler runs.
    OneShot,
    /// Re-arms at `previous_deadline + period`, not `now + period`, so it does not
    /// accumulate drift.
    Periodic,
}

/// Type-erased equality for timer keys: `(TypeId, value)`.
trait KeyEq: Any + Send {
    fn eq_any(&self, other: &dyn Any) -> bool;
}

impl<T: PartialEq + Send + 'static> KeyEq for T {
    fn eq_any(&self, other: &dyn Any) -> bool {
        match other.downcast_ref::<T>() {
            Some(o) => self == o,
            None => false,
        }
    }
}

pub(crate) type TimerId = u64;

struct TimerRecord<O> {
    type_id: TypeId,
    key: Box<dyn KeyEq>,
    period: Duration,
    cycle: Cycle,
    // Reusable: a periodic timer invokes this every time it fires, with a fresh clone
    // of the value it was started with.
    fire: Box<dyn Fn(&mut O, &mut Context<'_, O>) + Send>,
}

#[derive(Eq, PartialEq)]
struct HeapKey {
    deadline: Instant,
    seq: u64,
    id: TimerId,
}

impl Ord for HeapKey {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap; reverse so the earliest deadline (and, for ties,
        // the earliest insertion) pops first.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for HeapKey {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of pending timers, plus a side table for key-based lookup/removal.
pub(crate) struct TimerSet<O> {
    heap: BinaryHeap<HeapKey>,
    records: std::collections::HashMap<TimerId, TimerRecord<O>>,
    next_id: TimerId,
    next_seq: u64,
}

impl<O: ActiveObject> TimerSet<O> {
    pub(crate) fn new() -> Self {
        TimerSet {
            heap: BinaryHeap::new(),
            records: std::collections::HashMap::new(),
            next_id: 0,
            next_seq: 0,
        }
    }

    /// Start (or replace) the timer keyed by `(TypeId::of::<T>(), value)`.
    pub(crate) fn start<T>(&mut self, value: T, period: Duration, cycle: Cycle)
    where
        O: Handles<T>,
        T: Clone + PartialEq + Send + 'static,
    {
        self.stop_matching::<T>(&value);

        let id = self.next_id;
        self.next_id += 1;
        let deadline = Instant::now() + period;

        let fire_value = value.clone();
        let record = TimerRecord {
            type_id: TypeId::of::<T>(),
            key: Box::new(value),
            period,
            cycle,
            fire: Box::new(move |obj: &mut O, ctx: &mut Context<'_, O>| {
                <O as Handles<T>>::handle(obj, fire_value.clone(), ctx);
            }),
        };
        self.records.insert(id, record);
        self.push_heap(id, deadline);
    }

    /// Remove the timer keyed by `(TypeId::of::<T>(), value)`; unknown keys are a
    /// silent no-op.
    pub(crate) fn stop<T>(&mut self, value: &T)
    where
        T: PartialEq + Send + 'static,
    {
        self.stop_matching::<T>(value);
    }

    fn stop_matching<T: PartialEq + Send + 'static>(&mut self, value: &T) {
        let type_id = TypeId::of::<T>();
        let dead: Vec<TimerId> = self
            .records
            .iter()
            .filter(|(_, r)| r.type_id == type_id && r.key.eq_any(value))
            .map(|(id, _)| *id)
            .collect();
        for id in dead {
            self.records.remove(&id);
            // Left in the heap as a stale entry; `pop_due` skips ids no longer in
            // `records`. Timer counts are expected small, so this is simpler and
            // cheaper in practice than a heap-internal removal.
        }
    }

    /// The nearest pending deadline, if any.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|k| k.deadline)
    }

    fn push_heap(&mut self, id: TimerId, deadline: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(HeapKey { deadline, seq, id });
    }

    /// Fire every timer whose deadline has passed, in non-decreasing deadline order
    /// (ties broken by insertion order), applying each to `object` via `ctx`.
    /// `OneShot` timers are removed before their handler runs; `Periodic` timers are
    /// re-armed at `previous_deadline + period`.
    pub(crate) fn fire_due(&mut self, object: &mut O, ctx: &mut Context<'_, O>) {
        let now = Instant::now();
        loop {
            let Some(top) = self.heap.peek() else { break };
            if top.deadline > now {
                break;
            }
            let HeapKey { id, deadline, .. } = self.heap.pop().unwrap();

            // Stale entry left behind by `stop_matching`.
            let Some(record) = self.records.remove(&id) else {
                continue;
            };

            if record.cycle == Cycle::OneShot {
                (record.fire)(object, ctx);
            } else {
                let next_deadline = deadline + record.period;
                (record.fire)(object, ctx);
                self.records.insert(id, record);
                self.push_heap(id, next_deadline);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe {
        fired: Vec<&'static str>,
    }

    impl ActiveObject for Probe {}

    impl Handles<&'static str> for Probe {
        fn handle(&mut self, msg: &'static str, _ctx: &mut Context<'_, Self>) {
            self.fired.push(msg);
        }
    }

    #[test]
    fn stop_unknown_key_is_a_no_op() {
        let mut timers: TimerSet<Probe> = TimerSet::new();
        timers.stop(&"never-started");
        assert!(timers.next_deadline().is_none());
    }

    #[test]
    fn restarting_same_key_replaces_period() {
        let mut timers: TimerSet<Probe> = TimerSet::new();
        timers.start("a", Duration::from_secs(10), Cycle::Periodic);
        let first_deadline = timers.next_deadline().unwrap();
        timers.start("a", Duration::from_millis(1), Cycle::Periodic);
        let second_deadline = timers.next_deadline().unwrap();
        assert!(second_deadline < first_deadline);
        assert_eq!(timers.records.len(), 1);
    }
}
