use crate::error::{Error, Result};
use crate::metrics::collector::MetricsCollector;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    Running,
    Draining,
    Stopped,
}

/// One unit of work fired by the dispatcher. `index` is the logical slot number.
#[async_trait]
pub trait Task: Send + Sync {
    async fn execute(&self, index: u64);
}

/// A slot the schedule decided to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub index: u64,
    /// Slots dropped right after this one because the loop fell behind.
    pub skipped: u64,
}

/// Even-rate fire times on a monotonic clock.
///
/// Missed slots are skipped rather than queued, so a stall never turns into a
/// burst afterwards.
#[derive(Debug, Clone)]
pub struct Schedule {
    interval: Duration,
    next_fire: Instant,
    next_index: u64,
}

impl Schedule {
    pub fn new(start: Instant, interval: Duration) -> Self {
        Self {
            interval,
            next_fire: start,
            next_index: 0,
        }
    }

    pub fn next_fire(&self) -> Instant {
        self.next_fire
    }

    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    pub fn poll(&mut self, now: Instant) -> Option<Slot> {
        if now < self.next_fire {
            return None;
        }

        let index = self.next_index;
        self.next_fire += self.interval;
        self.next_index += 1;

        let mut skipped = 0;
        if now > self.next_fire && !self.interval.is_zero() {
            let behind = now - self.next_fire;
            skipped = (behind.as_nanos() / self.interval.as_nanos()) as u64;
            if skipped > 0 {
                self.next_fire += self.interval * skipped as u32;
                self.next_index += skipped;
            }
        }

        Some(Slot { index, skipped })
    }

    /// Time left until the next slot is due, zero if it already is.
    pub fn until_next(&self, now: Instant) -> Duration {
        self.next_fire.saturating_duration_since(now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub dispatched: u64,
    pub skipped: u64,
    pub abandoned: u64,
    /// From the first fire until every worker joined or was abandoned.
    pub elapsed: Duration,
}

pub struct Dispatcher {
    interval: Duration,
    duration: Duration,
    tick: Duration,
    join_timeout: Duration,
    metrics: MetricsCollector,
    started: AtomicBool,
    state_watcher: watch::Sender<DispatcherState>,
}

impl Dispatcher {
    pub fn new(
        interval: Duration,
        duration: Duration,
        tick: Duration,
        join_timeout: Duration,
        metrics: MetricsCollector,
    ) -> Self {
        let (state_tx, _) = watch::channel(DispatcherState::Idle);

        Self {
            interval,
            duration,
            tick,
            join_timeout,
            metrics,
            started: AtomicBool::new(false),
            state_watcher: state_tx,
        }
    }

    pub fn state(&self) -> DispatcherState {
        *self.state_watcher.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<DispatcherState> {
        self.state_watcher.subscribe()
    }

    fn set_state(&self, state: DispatcherState) {
        log::debug!("Dispatcher state -> {:?}", state);
        self.state_watcher.send_replace(state);
    }

    /// Fires `task` at the configured rate until the deadline or until `stop`
    /// turns true, then waits for the spawned tasks.
    pub async fn run<T>(&self, task: Arc<T>, mut stop: watch::Receiver<bool>) -> Result<DispatchReport>
    where
        T: Task + 'static,
    {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::Dispatch("dispatcher can only run once".to_string()));
        }
        self.set_state(DispatcherState::Running);

        let start = Instant::now();
        let deadline = start + self.duration;
        let mut schedule = Schedule::new(start, self.interval);
        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        let mut dispatched = 0u64;
        let mut skipped_total = 0u64;
        let mut stop_closed = false;

        loop {
            if *stop.borrow() {
                log::info!("Stop requested, no longer dispatching");
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                log::info!("Reached run duration, no longer dispatching");
                break;
            }

            if let Some(slot) = schedule.poll(now) {
                let task = Arc::clone(&task);
                handles.push(tokio::spawn(async move {
                    task.execute(slot.index).await;
                }));
                dispatched += 1;
                self.metrics.increment_dispatched();

                if slot.skipped > 0 {
                    log::warn!(
                        "Dispatcher fell behind, skipping {} slot(s) after #{}",
                        slot.skipped,
                        slot.index
                    );
                    skipped_total += slot.skipped;
                    self.metrics.add_skipped(slot.skipped);
                }
            }

            handles.retain(|handle| !handle.is_finished());

            let wait = schedule.until_next(Instant::now()).min(self.tick);
            if wait.is_zero() {
                continue;
            }
            tokio::select! {
                _ = sleep(wait) => {}
                changed = stop.changed(), if !stop_closed => {
                    if changed.is_err() {
                        stop_closed = true;
                    }
                }
            }
        }

        self.set_state(DispatcherState::Draining);
        if dispatched == 0 {
            self.set_state(DispatcherState::Stopped);
            return Err(Error::Dispatch("no request was dispatched".to_string()));
        }

        log::info!(
            "Dispatched {} request(s), waiting for {} still running",
            dispatched,
            handles.len()
        );
        let mut abandoned = 0u64;
        for handle in handles {
            match timeout(self.join_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::error!("Worker task failed: {}", e),
                Err(_) => {
                    abandoned += 1;
                    log::warn!(
                        "Worker still running after {:?}, abandoning it",
                        self.join_timeout
                    );
                }
            }
        }
        if abandoned > 0 {
            self.metrics.add_abandoned(abandoned);
        }

        self.set_state(DispatcherState::Stopped);
        Ok(DispatchReport {
            dispatched,
            skipped: skipped_total,
            abandoned,
            elapsed: start.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex;

    const INTERVAL: Duration = Duration::from_millis(100);

    #[test]
    fn fires_once_per_due_slot() {
        let start = Instant::now();
        let mut schedule = Schedule::new(start, INTERVAL);

        assert_eq!(schedule.poll(start), Some(Slot { index: 0, skipped: 0 }));
        assert_eq!(schedule.poll(start), None);
        assert_eq!(schedule.poll(start + Duration::from_millis(99)), None);
        assert_eq!(
            schedule.poll(start + Duration::from_millis(100)),
            Some(Slot { index: 1, skipped: 0 })
        );
        assert_eq!(schedule.until_next(start + Duration::from_millis(150)), Duration::from_millis(50));
    }

    #[test]
    fn skips_missed_slots_instead_of_bursting() {
        let start = Instant::now();
        let mut schedule = Schedule::new(start, INTERVAL);
        schedule.poll(start);

        // stalled until 5.5 intervals in: slot 1 fires late, then the fire time
        // is 3.5 intervals behind, so three slots are dropped
        let now = start + Duration::from_millis(550);
        let late = schedule.poll(now).unwrap();
        assert_eq!(late, Slot { index: 1, skipped: 3 });
        assert_eq!(schedule.next_index(), 5);
        assert_eq!(schedule.next_fire(), start + Duration::from_millis(500));

        // the slot due at 500ms still fires, then nothing more at the same instant
        assert_eq!(schedule.poll(now), Some(Slot { index: 5, skipped: 0 }));
        assert_eq!(schedule.poll(now), None);
    }

    #[test]
    fn skip_count_is_floor_of_delay_over_interval() {
        for delay_ms in [0u64, 50, 99, 100, 150, 250, 999, 1000] {
            let start = Instant::now();
            let mut schedule = Schedule::new(start, INTERVAL);
            schedule.poll(start);
            // once slot 1 fires, the advanced fire time is `delay_ms` behind now
            let now = schedule.next_fire() + INTERVAL + Duration::from_millis(delay_ms);
            let slot = schedule.poll(now).unwrap();
            assert_eq!(slot.skipped, delay_ms / 100, "delay {}ms", delay_ms);
            assert!(schedule.next_fire() <= now);
            assert!(now - schedule.next_fire() < INTERVAL);
        }
    }

    #[derive(Default)]
    struct CountingTask {
        executed: AtomicU64,
        indices: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl Task for CountingTask {
        async fn execute(&self, index: u64) {
            self.executed.fetch_add(1, Ordering::SeqCst);
            self.indices.lock().unwrap().push(index);
        }
    }

    fn dispatcher(rpm: f64, duration: Duration) -> Dispatcher {
        Dispatcher::new(
            Duration::from_nanos((60_000_000_000.0 / rpm) as u64),
            duration,
            Duration::from_millis(100),
            Duration::from_secs(1),
            MetricsCollector::new(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn emits_rate_times_duration() {
        let dispatcher = dispatcher(600.0, Duration::from_secs(10));
        let task = Arc::new(CountingTask::default());
        let (_stop_tx, stop_rx) = watch::channel(false);

        let report = dispatcher.run(task.clone(), stop_rx).await.unwrap();

        assert!((99..=101).contains(&report.dispatched), "dispatched {}", report.dispatched);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.abandoned, 0);
        assert_eq!(task.executed.load(Ordering::SeqCst), report.dispatched);
        assert_eq!(dispatcher.state(), DispatcherState::Stopped);

        let mut indices = task.indices.lock().unwrap().clone();
        indices.sort_unstable();
        assert_eq!(indices, (0..report.dispatched).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_signal_ends_dispatch_early() {
        let dispatcher = dispatcher(600.0, Duration::from_secs(60));
        let task = Arc::new(CountingTask::default());
        let (stop_tx, stop_rx) = watch::channel(false);

        tokio::spawn(async move {
            sleep(Duration::from_millis(1050)).await;
            stop_tx.send(true).unwrap();
        });
        let report = dispatcher.run(task, stop_rx).await.unwrap();

        assert!((10..=12).contains(&report.dispatched), "dispatched {}", report.dispatched);
        assert!(report.elapsed < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn runs_only_once() {
        let dispatcher = dispatcher(600.0, Duration::from_secs(1));
        let task = Arc::new(CountingTask::default());
        let (_stop_tx, stop_rx) = watch::channel(false);

        dispatcher.run(task.clone(), stop_rx.clone()).await.unwrap();
        assert!(matches!(dispatcher.run(task, stop_rx).await, Err(Error::Dispatch(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_dispatched_is_fatal() {
        let dispatcher = dispatcher(600.0, Duration::from_secs(10));
        let task = Arc::new(CountingTask::default());
        let (_stop_tx, stop_rx) = watch::channel(true);

        assert!(matches!(dispatcher.run(task, stop_rx).await, Err(Error::Dispatch(_))));
        assert_eq!(dispatcher.state(), DispatcherState::Stopped);
    }

    struct StuckTask;

    #[async_trait]
    impl Task for StuckTask {
        async fn execute(&self, _index: u64) {
            sleep(Duration::from_secs(3600)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stragglers_are_abandoned_after_join_timeout() {
        let metrics = MetricsCollector::new();
        let dispatcher = Dispatcher::new(
            Duration::from_millis(500),
            Duration::from_secs(1),
            Duration::from_millis(100),
            Duration::from_secs(2),
            metrics.clone(),
        );
        let (_stop_tx, stop_rx) = watch::channel(false);

        let report = dispatcher.run(Arc::new(StuckTask), stop_rx).await.unwrap();

        assert_eq!(report.dispatched, 2);
        assert_eq!(report.abandoned, 2);
        assert_eq!(metrics.snapshot().abandoned, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn state_changes_are_published() {
        let dispatcher = Dispatcher::new(
            Duration::from_millis(500),
            Duration::from_secs(1),
            Duration::from_millis(100),
            Duration::from_secs(2),
            MetricsCollector::new(),
        );
        let mut states = dispatcher.watch_state();
        let (_stop_tx, stop_rx) = watch::channel(false);

        let observe = async {
            let mut seen = Vec::new();
            while states.changed().await.is_ok() {
                let state = *states.borrow_and_update();
                seen.push(state);
                if state == DispatcherState::Stopped {
                    break;
                }
            }
            seen
        };
        let (report, seen) = tokio::join!(dispatcher.run(Arc::new(StuckTask), stop_rx), observe);

        assert_eq!(report.unwrap().abandoned, 2);
        assert_eq!(
            seen,
            vec![
                DispatcherState::Running,
                DispatcherState::Draining,
                DispatcherState::Stopped
            ]
        );
    }
}
