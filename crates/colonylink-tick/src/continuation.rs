use std::collections::VecDeque;

/// Work deferred to a later tick.
///
/// Some workflows must not finish inside the step that starts them: a hard
/// sync re-requests the save only after the old transfer state is gone, and
/// a finished download is handed to the engine outside the packet path.
/// Each stage is queued here with the tick it becomes due on.
#[derive(Debug)]
pub struct Continuations<C> {
    /// `(due_tick, item)` in scheduling order.
    queue: VecDeque<(u64, C)>,
}

impl<C> Default for Continuations<C> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }
}

impl<C> Continuations<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `item` to run `ticks` ticks after `now`. Zero means "next time
    /// `due` is called for `now` or later".
    pub fn schedule_after(&mut self, now: u64, ticks: u64, item: C) {
        self.queue.push_back((now.saturating_add(ticks), item));
    }

    /// Removes and returns every item due at `tick`, in scheduling order.
    pub fn due(&mut self, tick: u64) -> Vec<C> {
        let mut ready = Vec::new();
        let mut waiting = VecDeque::with_capacity(self.queue.len());
        for (at, item) in self.queue.drain(..) {
            if at <= tick {
                ready.push(item);
            } else {
                waiting.push_back((at, item));
            }
        }
        self.queue = waiting;
        ready
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}
