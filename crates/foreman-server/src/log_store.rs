use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::{RwLock, mpsc};

/// Slots kept in the time-indexed ring.
pub const RING_CAPACITY: usize = 1000;

/// Lines buffered between the pipe readers and the merge writer. Producers
/// never block on a full channel; excess lines are dropped.
pub const CHANNEL_CAPACITY: usize = 1000;

/// Bounds for windowed queries, relative to a request start instant.
///
/// `lookback` widens the window to the left to tolerate producer clock
/// skew, `lookahead` admits lines written just after the response arrives,
/// and `cutoff` is where the backward ring scan stops.
#[derive(Debug, Clone, Copy)]
pub struct WindowBounds {
    pub lookback: Duration,
    pub lookahead: Duration,
    pub cutoff: Duration,
}

impl Default for WindowBounds {
    fn default() -> Self {
        Self {
            lookback: Duration::from_secs(1),
            lookahead: Duration::from_millis(500),
            cutoff: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    line: String,
    at: Instant,
}

/// Merged stdout+stderr capture for one child: the append-only combined
/// buffer (unbounded for the child's lifetime) and a bounded ring of
/// timestamped lines for windowed retrieval.
///
/// Only the merge writer mutates this; queries take the read side of the
/// surrounding lock.
#[derive(Debug)]
pub struct LogStore {
    combined: String,
    slots: Vec<Option<Slot>>,
    write_index: usize,
}

impl Default for LogStore {
    fn default() -> Self {
        Self::with_capacity(RING_CAPACITY)
    }
}

impl LogStore {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            combined: String::new(),
            slots: vec![None; capacity.max(1)],
            write_index: 0,
        }
    }

    /// Append one line to the combined buffer and the ring.
    pub fn push(&mut self, line: &str) {
        self.combined.push_str(line);
        self.combined.push('\n');

        self.slots[self.write_index] = Some(Slot {
            line: line.to_string(),
            at: Instant::now(),
        });
        self.write_index = (self.write_index + 1) % self.slots.len();
    }

    /// The full combined stdout+stderr stream so far.
    pub fn snapshot(&self) -> String {
        self.combined.clone()
    }

    /// Lines whose timestamps fall in `[start - lookback, now + lookahead)`,
    /// in chronological order. An empty result is legal.
    pub fn window(&self, start: Instant) -> String {
        self.window_with(start, WindowBounds::default())
    }

    pub fn window_with(&self, start: Instant, bounds: WindowBounds) -> String {
        let window_start = start.checked_sub(bounds.lookback).unwrap_or(start);
        let scan_floor = start.checked_sub(bounds.cutoff).unwrap_or(start);
        let window_end = Instant::now() + bounds.lookahead;

        let capacity = self.slots.len();
        let mut matched: Vec<&str> = Vec::new();

        // Newest first; the ring is time-sorted within a wrap, so the scan
        // can stop once it falls below the floor.
        for i in 0..capacity {
            let idx = (self.write_index + capacity - 1 - i) % capacity;
            let Some(slot) = &self.slots[idx] else {
                continue;
            };

            if slot.at >= window_start && slot.at < window_end {
                matched.push(&slot.line);
            }
            if slot.at < scan_floor {
                break;
            }
        }

        matched.reverse();
        matched.join("\n")
    }
}

/// Run the single merge writer for one child: drain the line channel into
/// the store until every producer has dropped its sender.
pub fn spawn_merge_writer(
    name: String,
    mut rx: mpsc::Receiver<String>,
    store: Arc<RwLock<LogStore>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            store.write().await.push(&line);
            tracing::debug!(process = %name, "{line}");
        }
        tracing::debug!(process = %name, "log channel drained");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tight_bounds() -> WindowBounds {
        WindowBounds {
            lookback: Duration::from_millis(50),
            lookahead: Duration::from_millis(50),
            cutoff: Duration::from_millis(100),
        }
    }

    #[test]
    fn window_includes_lines_after_start() {
        let mut store = LogStore::with_capacity(8);
        let start = Instant::now();
        store.push("first");
        store.push("second");

        let got = store.window_with(start, tight_bounds());
        assert_eq!(got, "first\nsecond");
    }

    #[test]
    fn window_excludes_lines_before_lookback() {
        let mut store = LogStore::with_capacity(8);
        store.push("old");
        std::thread::sleep(Duration::from_millis(80));

        let start = Instant::now();
        store.push("fresh");

        let got = store.window_with(start, tight_bounds());
        assert_eq!(got, "fresh");
    }

    #[test]
    fn window_on_empty_store_is_empty() {
        let store = LogStore::with_capacity(8);
        assert_eq!(store.window_with(Instant::now(), tight_bounds()), "");
    }

    #[test]
    fn ring_wraps_but_combined_keeps_everything() {
        let mut store = LogStore::with_capacity(3);
        for i in 0..5 {
            store.push(&format!("line-{i}"));
        }

        // Ring only retains the newest three lines.
        let start = Instant::now();
        let bounds = WindowBounds {
            lookback: Duration::from_secs(5),
            lookahead: Duration::from_millis(50),
            cutoff: Duration::from_secs(10),
        };
        assert_eq!(store.window_with(start, bounds), "line-2\nline-3\nline-4");

        let all = store.snapshot();
        for i in 0..5 {
            assert!(all.contains(&format!("line-{i}")));
        }
    }

    #[tokio::test]
    async fn merge_writer_drains_until_senders_drop() {
        let store = Arc::new(RwLock::new(LogStore::with_capacity(8)));
        let (tx, rx) = mpsc::channel(4);
        let writer = spawn_merge_writer("test".to_string(), rx, store.clone());

        let tx2 = tx.clone();
        tx.send("from stdout".to_string()).await.unwrap();
        tx2.send("from stderr".to_string()).await.unwrap();
        drop(tx);
        drop(tx2);

        writer.await.unwrap();
        let snapshot = store.read().await.snapshot();
        assert_eq!(snapshot, "from stdout\nfrom stderr\n");
    }
}
