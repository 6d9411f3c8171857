use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
    time::{Duration, Instant},
};

/// Single timer wheel servicing every transaction in the endpoint.
///
/// Entries are a deadline heap plus an id-to-value map; cancellation
/// removes the value and leaves a tombstone in the heap that `poll`
/// discards lazily. One polling task drives all timers, so there is no
/// per-transaction timer thread or wakeup jitter between transactions.
pub struct Timer<T> {
    deadlines: Mutex<BinaryHeap<Reverse<(Instant, u64)>>>,
    values: Mutex<HashMap<u64, T>>,
    last_task_id: AtomicU64,
}

impl<T> Timer<T> {
    pub fn new() -> Self {
        Timer {
            deadlines: Mutex::new(BinaryHeap::new()),
            values: Mutex::new(HashMap::new()),
            last_task_id: AtomicU64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.values.lock().map(|v| v.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Schedules `value` to fire after `duration`, returning a task id
    /// usable with [`Timer::cancel`].
    pub fn timeout(&self, duration: Duration, value: T) -> u64 {
        self.timeout_at(Instant::now() + duration, value)
    }

    pub fn timeout_at(&self, execute_at: Instant, value: T) -> u64 {
        let task_id = self.last_task_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut values) = self.values.lock() {
            values.insert(task_id, value);
        }
        if let Ok(mut deadlines) = self.deadlines.lock() {
            deadlines.push(Reverse((execute_at, task_id)));
        }
        task_id
    }

    /// Cancels a scheduled timer, returning its value when it had not
    /// fired yet.
    pub fn cancel(&self, task_id: u64) -> Option<T> {
        self.values.lock().ok()?.remove(&task_id)
    }

    /// Removes and returns every timer due at `now`. Cancelled entries
    /// are skipped silently.
    pub fn poll(&self, now: Instant) -> Vec<T> {
        let mut due = Vec::new();
        {
            let mut deadlines = match self.deadlines.lock() {
                Ok(deadlines) => deadlines,
                Err(_) => return Vec::new(),
            };
            while let Some(Reverse((execute_at, task_id))) = deadlines.peek().copied() {
                if execute_at > now {
                    break;
                }
                deadlines.pop();
                due.push(task_id);
            }
        }
        let mut result = Vec::with_capacity(due.len());
        if let Ok(mut values) = self.values.lock() {
            for task_id in due {
                if let Some(value) = values.remove(&task_id) {
                    result.push(value);
                }
            }
        }
        result
    }
}

impl<T> Default for Timer<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[test]
fn test_timer() {
    let timer = Timer::new();
    let now = Instant::now();
    let task_id = timer.timeout_at(now, "task1");
    assert_eq!(task_id, 1);
    assert_eq!(timer.cancel(task_id), Some("task1"));
    assert_eq!(timer.cancel(task_id), None);

    timer.timeout_at(now, "task2");
    let due = timer.poll(now + Duration::from_secs(1));
    assert_eq!(due, vec!["task2"]);

    timer.timeout_at(now + Duration::from_millis(1001), "task3");
    assert!(timer.poll(now + Duration::from_secs(1)).is_empty());
    assert_eq!(timer.len(), 1);
}

#[test]
fn cancelled_timer_never_fires() {
    let timer = Timer::new();
    let now = Instant::now();
    let id = timer.timeout_at(now, "doomed");
    timer.timeout_at(now, "survivor");
    timer.cancel(id);
    let due = timer.poll(now + Duration::from_millis(1));
    assert_eq!(due, vec!["survivor"]);
    assert!(timer.is_empty());
}
