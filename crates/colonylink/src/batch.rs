//! Coalescing of small host-side deltas into periodic batch packets.
//!
//! The engine pushes cell updates and spawned objects as they happen, from
//! whatever thread it runs on. The tick loop flushes each queue on its own
//! interval, cutting it into packets that fit the class ceiling.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use colonylink_protocol::wire::LENGTH_PREFIX;
use colonylink_protocol::{
    CellUpdate, HEADER_LEN, Instantiation, InstantiationBatch, PacketBody, Reliability, WireItem,
    WorldUpdateBatch,
};

use crate::config::{BatchConfig, SizeLimits};

/// A list element that travels in its own batch packet.
pub trait Batchable: WireItem + Send + 'static {
    type Packet: PacketBody;

    fn into_packet(items: Vec<Self>) -> Self::Packet;
}

impl Batchable for CellUpdate {
    type Packet = WorldUpdateBatch;

    fn into_packet(items: Vec<Self>) -> WorldUpdateBatch {
        WorldUpdateBatch { updates: items }
    }
}

impl Batchable for Instantiation {
    type Packet = InstantiationBatch;

    fn into_packet(items: Vec<Self>) -> InstantiationBatch {
        InstantiationBatch { items }
    }
}

/// How many items of at least `T::MIN_WIRE_SIZE` bytes fit a packet under
/// `ceiling`, never more than `cap`.
pub fn max_items_for<T: WireItem>(ceiling: usize, cap: usize) -> usize {
    let body = ceiling.saturating_sub(HEADER_LEN + LENGTH_PREFIX);
    (body / T::MIN_WIRE_SIZE.max(1)).min(cap).max(1)
}

#[derive(Debug)]
struct Queue<T> {
    items: Vec<T>,
    last_flush: Option<Instant>,
}

/// Thread-safe queue flushed on a fixed interval.
#[derive(Debug)]
pub struct Batcher<T> {
    name: &'static str,
    state: Mutex<Queue<T>>,
    interval: Duration,
    reliability: Reliability,
    max_items: usize,
    /// Body bytes available for list items in one packet.
    byte_budget: usize,
    enabled: bool,
}

pub type WorldUpdateBatcher = Batcher<CellUpdate>;
pub type InstantiationBatcher = Batcher<Instantiation>;

impl<T: Batchable> Batcher<T> {
    pub fn new(
        name: &'static str,
        interval: Duration,
        reliability: Reliability,
        ceiling: usize,
        cap: usize,
        enabled: bool,
    ) -> Self {
        Self {
            name,
            state: Mutex::new(Queue {
                items: Vec::new(),
                last_flush: None,
            }),
            interval,
            reliability,
            max_items: max_items_for::<T>(ceiling, cap),
            byte_budget: ceiling.saturating_sub(HEADER_LEN + LENGTH_PREFIX),
            enabled,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queue<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn reliability(&self) -> Reliability {
        self.reliability
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }

    /// Queues one item. Refused (returns `false`) unless hosting.
    pub fn push(&self, item: T) -> bool {
        if !self.enabled {
            tracing::debug!(batch = self.name, "not hosting, item not queued");
            return false;
        }
        self.lock().items.push(item);
        true
    }

    pub fn extend(&self, items: impl IntoIterator<Item = T>) -> bool {
        if !self.enabled {
            tracing::debug!(batch = self.name, "not hosting, items not queued");
            return false;
        }
        self.lock().items.extend(items);
        true
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains the queue into groups of at most `max_items` that also fit
    /// the byte budget. Order is preserved.
    pub fn take_batches(&self, max_items: usize) -> Vec<Vec<T>> {
        let items = std::mem::take(&mut self.lock().items);
        let max_items = max_items.max(1);
        let mut batches = Vec::new();
        let mut current = Vec::new();
        let mut bytes = 0;
        for item in items {
            let len = item.wire_len();
            if !current.is_empty() && (current.len() >= max_items || bytes + len > self.byte_budget)
            {
                batches.push(std::mem::take(&mut current));
                bytes = 0;
            }
            bytes += len;
            current.push(item);
        }
        if !current.is_empty() {
            batches.push(current);
        }
        batches
    }

    /// Packets to send now, or nothing when the interval has not elapsed.
    /// The first call starts the clock.
    pub fn flush_due(&self, now: Instant) -> Vec<T::Packet> {
        {
            let mut state = self.lock();
            match state.last_flush {
                None => {
                    state.last_flush = Some(now);
                    return Vec::new();
                }
                Some(last) if now.duration_since(last) < self.interval => return Vec::new(),
                Some(_) => state.last_flush = Some(now),
            }
        }
        let batches = self.take_batches(self.max_items);
        if !batches.is_empty() {
            tracing::debug!(batch = self.name, packets = batches.len(), "flushing batch");
        }
        batches.into_iter().map(T::into_packet).collect()
    }

    pub fn clear(&self) {
        self.lock().items.clear();
    }
}

/// The host's two batching queues.
#[derive(Debug)]
pub struct Batches {
    pub world: WorldUpdateBatcher,
    pub instantiations: InstantiationBatcher,
}

impl Batches {
    pub fn new(config: &BatchConfig, limits: &SizeLimits, hosting: bool) -> Self {
        Self {
            world: Batcher::new(
                "world_updates",
                config.world_update_interval(),
                WorldUpdateBatch::RELIABILITY,
                limits.unreliable_max_bytes,
                config.max_updates_per_packet,
                hosting,
            ),
            instantiations: Batcher::new(
                "instantiations",
                config.instantiation_interval(),
                InstantiationBatch::RELIABILITY,
                limits.reliable_max_bytes,
                usize::MAX,
                hosting,
            ),
        }
    }

    /// Queues nothing and sends nothing. Used before a session starts.
    pub fn disabled() -> Self {
        Self::new(&BatchConfig::default(), &SizeLimits::default(), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(cell: i32) -> CellUpdate {
        CellUpdate {
            cell,
            element: 7,
            temperature: 300.0,
            mass: 1.5,
        }
    }

    fn world_batcher(enabled: bool) -> WorldUpdateBatcher {
        Batches::new(&BatchConfig::default(), &SizeLimits::default(), enabled).world
    }

    #[test]
    fn test_max_items_for_unreliable_ceiling_caps_below_config() {
        // (1200 - 5) / 14
        assert_eq!(max_items_for::<CellUpdate>(1200, 180), 85);
        assert_eq!(max_items_for::<CellUpdate>(512 * 1024, 180), 180);
    }

    #[test]
    fn test_push_on_non_host_refused() {
        let batcher = world_batcher(false);
        assert!(!batcher.push(update(1)));
        assert!(batcher.is_empty());
    }

    #[test]
    fn test_take_batches_splits_and_keeps_order() {
        let batcher = world_batcher(true);
        batcher.extend((0..200).map(update));

        let batches = batcher.take_batches(85);

        assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![85, 85, 30]);
        assert_eq!(batches[1][0].cell, 85);
        assert!(batcher.is_empty());
    }

    #[test]
    fn test_take_batches_respects_byte_budget_for_variable_items() {
        let batcher = Batcher::<Instantiation>::new(
            "instantiations",
            Duration::from_secs(2),
            Reliability::Reliable,
            100,
            usize::MAX,
            true,
        );
        for i in 0..4 {
            batcher.push(Instantiation {
                prefab: "x".repeat(30),
                cell: i,
                net_id: i,
            });
        }

        // each item is 4 + 30 + 8 = 42 bytes, budget is 95
        let batches = batcher.take_batches(usize::MAX);
        assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 2]);
    }

    #[test]
    fn test_flush_due_waits_for_interval() {
        let batcher = world_batcher(true);
        let start = Instant::now();
        assert!(batcher.flush_due(start).is_empty());

        batcher.push(update(3));
        assert!(batcher.flush_due(start + Duration::from_secs(5)).is_empty());
        assert_eq!(batcher.len(), 1);

        let packets = batcher.flush_due(start + Duration::from_secs(10));
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].updates, vec![update(3)]);
    }

    #[test]
    fn test_flush_due_empty_queue_sends_nothing() {
        let batcher = world_batcher(true);
        let start = Instant::now();
        batcher.flush_due(start);
        assert!(batcher.flush_due(start + Duration::from_secs(30)).is_empty());
    }
}
