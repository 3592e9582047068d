//! Connection scoped background tasks.

use std::future::Future;

use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};

/// A group of tasks that are cancelled together.
///
/// Holds the handshake sends, the keep-alive interval and the tasks that watch the link. Every
/// task is aborted by [`TimerSet::cancel_all`] or when the set is dropped.
#[derive(Debug, Default)]
pub(crate) struct TimerSet {
    handles: Vec<JoinHandle<()>>,
}

impl TimerSet {
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handles.retain(|handle| !handle.is_finished());
        self.handles.push(tokio::spawn(task));
    }

    /// Run `task` once after `delay`.
    pub fn after<F>(&mut self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn(async move {
            time::sleep(delay).await;
            task.await;
        });
    }

    /// Run `tick` every `period`, the first time one period from now.
    ///
    /// A tick that takes longer than the period delays the following ones instead of bunching
    /// them up.
    pub fn every<F, Fut>(&mut self, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let start = Instant::now() + period;
        self.spawn(async move {
            let mut interval = time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tick().await;
            }
        });
    }

    pub fn cancel_all(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
use std::sync::{Arc, Mutex};

#[tokio::test(start_paused = true)]
async fn test_after_and_every_fire_on_schedule() {
    let start = Instant::now();
    let fired = Arc::new(Mutex::new(Vec::new()));
    let mut timers = TimerSet::default();

    let log = fired.clone();
    timers.after(Duration::from_millis(300), async move {
        log.lock().unwrap().push(("once", start.elapsed()));
    });
    let log = fired.clone();
    timers.every(Duration::from_millis(1000), move || {
        let log = log.clone();
        async move { log.lock().unwrap().push(("every", start.elapsed())) }
    });

    time::sleep(Duration::from_millis(2500)).await;
    let fired = fired.lock().unwrap().clone();
    assert_eq!(
        fired,
        vec![
            ("once", Duration::from_millis(300)),
            ("every", Duration::from_millis(1000)),
            ("every", Duration::from_millis(2000)),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_all_stops_pending_tasks() {
    let fired = Arc::new(Mutex::new(0));
    let mut timers = TimerSet::default();

    let count = fired.clone();
    timers.after(Duration::from_millis(100), async move {
        *count.lock().unwrap() += 1;
    });
    let count = fired.clone();
    timers.every(Duration::from_millis(100), move || {
        let count = count.clone();
        async move { *count.lock().unwrap() += 1 }
    });

    timers.cancel_all();
    assert!(timers.is_empty());
    time::sleep(Duration::from_secs(1)).await;
    assert_eq!(*fired.lock().unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_drop_cancels() {
    let fired = Arc::new(Mutex::new(false));
    let flag = fired.clone();
    {
        let mut timers = TimerSet::default();
        timers.after(Duration::from_millis(10), async move {
            *flag.lock().unwrap() = true;
        });
    }
    time::sleep(Duration::from_millis(50)).await;
    assert!(!*fired.lock().unwrap());
}
