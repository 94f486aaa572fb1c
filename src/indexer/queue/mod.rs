// Work queue between the debouncer and the indexing worker
// Keyed by path: a newer event for a queued path replaces it in place

#[cfg(test)]
mod tests;

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::debug;

use crate::watcher::ChangeEvent;

/// Queue statistics for monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending_count: usize,
    /// Events pushed since creation
    pub pushed_count: u64,
    /// Pushes that replaced an already queued event for the same path
    pub superseded_count: u64,
    pub popped_count: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<ChangeEvent>,
    pushed: u64,
    superseded: u64,
    popped: u64,
}

/// FIFO of change events with at most one queued entry per path
///
/// Popped events are in flight and are never replaced; a later event for the
/// same path is queued behind them.
#[derive(Debug, Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `event`, replacing a queued event for the same path
    #[inline]
    pub fn push(&self, event: ChangeEvent) {
        {
            let mut state = self.lock();
            state.pushed += 1;
            if let Some(queued) = state.items.iter_mut().find(|e| e.path == event.path) {
                debug!(
                    "Superseding queued {} with {} for {}",
                    queued.kind,
                    event.kind,
                    event.path.display()
                );
                *queued = event;
                state.superseded += 1;
            } else {
                state.items.push_back(event);
            }
        }
        self.notify.notify_one();
    }

    /// Take the oldest event without waiting
    #[inline]
    pub fn try_pop(&self) -> Option<ChangeEvent> {
        let mut state = self.lock();
        let event = state.items.pop_front();
        if event.is_some() {
            state.popped += 1;
        }
        event
    }

    /// Wait for the next event
    #[inline]
    pub async fn pop(&self) -> ChangeEvent {
        loop {
            if let Some(event) = self.try_pop() {
                return event;
            }
            self.notify.notified().await;
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    #[inline]
    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        QueueStats {
            pending_count: state.items.len(),
            pushed_count: state.pushed,
            superseded_count: state.superseded,
            popped_count: state.popped,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        // A poisoned lock still holds a consistent queue
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
