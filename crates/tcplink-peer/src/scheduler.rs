use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use tracing::debug;

/// Named one-shot task scheduler.
///
/// Each scheduled task fires exactly once after its delay unless cancelled
/// by name first. A fired task removes its own entry *before* running its
/// callback, so the callback may schedule again under the same name; this
/// is how retry loops re-arm themselves without recursion.
///
/// Every scheduler instance has its own task table; names only collide
/// within one instance.
#[derive(Clone, Default)]
pub struct Scheduler {
    tasks: Arc<Mutex<HashMap<String, TaskHandle>>>,
}

struct TaskHandle {
    signal: Arc<TaskSignal>,
}

struct TaskSignal {
    cancelled: Mutex<bool>,
    condvar: Condvar,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `callback` to run once after `delay`.
    ///
    /// Returns false if a task with this name is already pending (the
    /// existing task is left untouched) or if the timer thread could not be
    /// spawned.
    pub fn schedule(
        &self,
        name: impl Into<String>,
        delay: Duration,
        callback: impl FnOnce() + Send + 'static,
    ) -> bool {
        let name = name.into();
        let signal = Arc::new(TaskSignal {
            cancelled: Mutex::new(false),
            condvar: Condvar::new(),
        });

        {
            let mut tasks = lock(&self.tasks);
            if tasks.contains_key(&name) {
                return false;
            }
            tasks.insert(
                name.clone(),
                TaskHandle {
                    signal: Arc::clone(&signal),
                },
            );
        }

        let tasks = Arc::clone(&self.tasks);
        let thread_name = format!("tcplink-timer-{name}");
        let task_name = name.clone();
        let spawned = std::thread::Builder::new().name(thread_name).spawn(move || {
            let cancelled = {
                let guard = signal
                    .cancelled
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                let (guard, _) = signal
                    .condvar
                    .wait_timeout_while(guard, delay, |cancelled| !*cancelled)
                    .unwrap_or_else(PoisonError::into_inner);
                *guard
            };

            if cancelled {
                debug!(task = %task_name, "scheduled task cancelled");
                return;
            }

            // Remove our own entry first so the callback can re-schedule
            // under the same name. Only remove it if it is still ours; a
            // cancel followed by a fresh schedule may have replaced it.
            {
                let mut map = lock(&tasks);
                if let Some(handle) = map.get(&task_name) {
                    if Arc::ptr_eq(&handle.signal, &signal) {
                        map.remove(&task_name);
                    }
                }
            }

            debug!(task = %task_name, "scheduled task firing");
            callback();
        });

        if spawned.is_err() {
            lock(&self.tasks).remove(&name);
            return false;
        }
        true
    }

    /// Cancel a pending task. Returns whether one was found.
    ///
    /// A task whose delay has already elapsed may still run its callback;
    /// callbacks that care must re-check their own conditions.
    pub fn cancel(&self, name: &str) -> bool {
        let Some(handle) = lock(&self.tasks).remove(name) else {
            return false;
        };
        *handle
            .signal
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = true;
        handle.signal.condvar.notify_all();
        true
    }

    /// Whether a task with this name is pending.
    pub fn exists(&self, name: &str) -> bool {
        lock(&self.tasks).contains_key(name)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    #[test]
    fn task_fires_once_after_delay() {
        let scheduler = Scheduler::new();
        let (tx, rx) = mpsc::channel();

        assert!(scheduler.schedule("fire", Duration::from_millis(20), move || {
            tx.send(()).unwrap();
        }));
        assert!(scheduler.exists("fire"));

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn fired_task_removes_its_entry() {
        let scheduler = Scheduler::new();
        let (tx, rx) = mpsc::channel();

        scheduler.schedule("gone", Duration::from_millis(10), move || {
            tx.send(()).unwrap();
        });
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // Removal happens before the callback runs; no extra settling needed.
        assert!(!scheduler.exists("gone"));
    }

    #[test]
    fn duplicate_name_rejected_while_pending() {
        let scheduler = Scheduler::new();
        let (tx, rx) = mpsc::channel();

        assert!(scheduler.schedule("dup", Duration::from_millis(50), move || {
            tx.send("first").unwrap();
        }));
        assert!(!scheduler.schedule("dup", Duration::from_millis(1), || {
            panic!("second task must not be scheduled");
        }));

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "first");
    }

    #[test]
    fn cancel_prevents_firing() {
        let scheduler = Scheduler::new();
        let (tx, rx) = mpsc::channel::<()>();

        scheduler.schedule("doomed", Duration::from_millis(50), move || {
            let _ = tx.send(());
        });
        assert!(scheduler.cancel("doomed"));
        assert!(!scheduler.exists("doomed"));

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn cancel_unknown_name_returns_false() {
        let scheduler = Scheduler::new();
        assert!(!scheduler.cancel("nothing"));
    }

    #[test]
    fn callback_can_reschedule_same_name() {
        let scheduler = Scheduler::new();
        let (tx, rx) = mpsc::channel();

        let inner = scheduler.clone();
        scheduler.schedule("chain", Duration::from_millis(10), move || {
            let tx2 = tx.clone();
            assert!(inner.schedule("chain", Duration::from_millis(10), move || {
                tx2.send("second").unwrap();
            }));
            tx.send("first").unwrap();
        });

        let mut got = vec![
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        ];
        got.sort_unstable();
        assert_eq!(got, ["first", "second"]);
    }

    #[test]
    fn independent_schedulers_do_not_share_names() {
        let a = Scheduler::new();
        let b = Scheduler::new();
        let (tx, rx) = mpsc::channel();

        let tx_a = tx.clone();
        assert!(a.schedule("task", Duration::from_millis(10), move || {
            tx_a.send("a").unwrap();
        }));
        assert!(b.schedule("task", Duration::from_millis(10), move || {
            tx.send("b").unwrap();
        }));

        let mut got = vec![
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        ];
        got.sort_unstable();
        assert_eq!(got, ["a", "b"]);
    }
}
