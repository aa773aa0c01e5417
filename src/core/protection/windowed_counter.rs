// Rolling-window counter with per-mark expiry.
//
// Every mark spawns its own one-shot timer that removes exactly that mark when
// the window elapses. There is no sweep loop. A mark is an (id, item) pair, so
// an expiry can only ever delete the mark that scheduled it; if the mark was
// already consumed by `mark_until` or `take`, the timer finds nothing and does
// nothing. Consumed marks also have their timer task aborted.
//
// Marks for the same key are serialized by the DashMap shard lock. Different
// keys only contend when they hash to the same shard.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;

struct Mark<V> {
    id: u64,
    item: V,
    expiry: AbortHandle,
}

type MarkMap<K, V> = DashMap<K, Vec<Mark<V>>>;

/// Result of recording a mark.
#[derive(Debug, PartialEq)]
pub enum MarkOutcome<V> {
    /// The item already has a live mark under this key. Nothing changed.
    Duplicate,
    /// Recorded. Holds the live count for the key, this mark included.
    Counted(usize),
    /// Recorded and the threshold was met. The key was emptied and these are
    /// the items it held, oldest first.
    Reached(Vec<V>),
}

pub struct WindowedCounter<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: PartialEq + Clone + Send + Sync + 'static,
{
    window: Duration,
    marks: Arc<MarkMap<K, V>>,
    next_id: AtomicU64,
}

impl<K, V> WindowedCounter<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: PartialEq + Clone + Send + Sync + 'static,
{
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            marks: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Record `item` under `key` and return the live count.
    ///
    /// Returns `None` if the item is already counted.
    #[cfg(test)]
    pub fn mark(&self, key: K, item: V) -> Option<usize> {
        match self.mark_until(key, item, None) {
            MarkOutcome::Duplicate => None,
            MarkOutcome::Counted(count) => Some(count),
            MarkOutcome::Reached(items) => Some(items.len()),
        }
    }

    /// Record `item` under `key`; if the live count reaches `threshold`, drain
    /// the key in the same critical section.
    ///
    /// The increment and the threshold check happen under one lock, so two
    /// concurrent marks can never both see "one below threshold".
    pub fn mark_until(&self, key: K, item: V, threshold: Option<usize>) -> MarkOutcome<V> {
        let items = {
            let mut marks = self.marks.entry(key.clone()).or_default();
            if marks.iter().any(|mark| mark.item == item) {
                return MarkOutcome::Duplicate;
            }

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let expiry = self.schedule_expiry(key.clone(), id);
            marks.push(Mark { id, item, expiry });

            let count = marks.len();
            if !threshold.is_some_and(|threshold| count >= threshold) {
                return MarkOutcome::Counted(count);
            }
            drain(&mut marks)
        };

        // Shard lock is released above; drop the now-empty key.
        self.marks.remove_if(&key, |_, marks| marks.is_empty());
        MarkOutcome::Reached(items)
    }

    /// Live count for a key.
    #[cfg(test)]
    pub fn count(&self, key: &K) -> usize {
        self.marks.get(key).map(|marks| marks.len()).unwrap_or(0)
    }

    /// Live items for a key, oldest first.
    pub fn items(&self, key: &K) -> Vec<V> {
        self.marks
            .get(key)
            .map(|marks| marks.iter().map(|mark| mark.item.clone()).collect())
            .unwrap_or_default()
    }

    /// Empty a key and return what it held, cancelling the pending expiries.
    #[cfg(test)]
    pub fn take(&self, key: &K) -> Vec<V> {
        self.marks
            .remove(key)
            .map(|(_, mut marks)| drain(&mut marks))
            .unwrap_or_default()
    }

    /// Drop every mark for every key.
    pub fn clear(&self) {
        for mut entry in self.marks.iter_mut() {
            drain(entry.value_mut());
        }
        self.marks.clear();
    }

    fn schedule_expiry(&self, key: K, id: u64) -> AbortHandle {
        let marks: Weak<MarkMap<K, V>> = Arc::downgrade(&self.marks);
        let deadline = Instant::now() + self.window;

        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(marks) = marks.upgrade() {
                expire(&marks, &key, id);
            }
        })
        .abort_handle()
    }
}

impl<K, V> Drop for WindowedCounter<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: PartialEq + Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.clear();
    }
}

/// Remove one specific mark. A no-op if it was already consumed.
fn expire<K, V>(marks: &MarkMap<K, V>, key: &K, id: u64)
where
    K: Eq + Hash,
{
    if let Some(mut live) = marks.get_mut(key) {
        live.retain(|mark| mark.id != id);
    }
    marks.remove_if(key, |_, live| live.is_empty());
}

fn drain<V>(marks: &mut Vec<Mark<V>>) -> Vec<V> {
    marks
        .drain(..)
        .map(|mark| {
            mark.expiry.abort();
            mark.item
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_marks_count_up() {
        let counter: WindowedCounter<u64, u64> = WindowedCounter::new(Duration::from_secs(10));

        assert_eq!(counter.mark(1, 100), Some(1));
        assert_eq!(counter.mark(1, 101), Some(2));
        assert_eq!(counter.mark(2, 100), Some(1));
        assert_eq!(counter.count(&1), 2);
        assert_eq!(counter.items(&1), vec![100, 101]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_item_not_counted() {
        let counter: WindowedCounter<u64, u64> = WindowedCounter::new(Duration::from_secs(10));

        assert_eq!(counter.mark(1, 100), Some(1));
        assert_eq!(counter.mark(1, 100), None);
        assert_eq!(counter.count(&1), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_mark_expires_on_its_own() {
        let counter: WindowedCounter<u64, u64> = WindowedCounter::new(Duration::from_secs(10));

        counter.mark(1, 100);
        tokio::time::sleep(Duration::from_secs(4)).await;
        counter.mark(1, 101);
        assert_eq!(counter.count(&1), 2);

        // First mark is 11s old, second only 7s.
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(counter.items(&1), vec![101]);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(counter.count(&1), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_drains_key() {
        let counter: WindowedCounter<u64, u64> = WindowedCounter::new(Duration::from_secs(10));

        assert_eq!(counter.mark_until(1, 100, Some(3)), MarkOutcome::Counted(1));
        assert_eq!(counter.mark_until(1, 101, Some(3)), MarkOutcome::Counted(2));
        assert_eq!(
            counter.mark_until(1, 102, Some(3)),
            MarkOutcome::Reached(vec![100, 101, 102])
        );
        assert_eq!(counter.count(&1), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consumed_marks_do_not_expire_new_ones() {
        let counter: WindowedCounter<u64, u64> = WindowedCounter::new(Duration::from_secs(10));

        counter.mark(1, 100);
        counter.mark(1, 101);
        assert_eq!(counter.take(&1), vec![100, 101]);

        // Re-mark the same item after the old timers would have fired had they
        // not been cancelled.
        tokio::time::sleep(Duration::from_secs(5)).await;
        counter.mark(1, 100);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(counter.count(&1), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.count(&1), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_drops_everything() {
        let counter: WindowedCounter<u64, u64> = WindowedCounter::new(Duration::from_secs(10));

        counter.mark(1, 100);
        counter.mark(2, 200);
        counter.clear();

        assert_eq!(counter.count(&1), 0);
        assert_eq!(counter.count(&2), 0);
    }
}
