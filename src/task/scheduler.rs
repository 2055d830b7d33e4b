//! Per-connector timer loop.
//!
//! The loop fires once immediately and then every `interval`. A cycle runs
//! inline in the loop, so ticks that come due while a cycle is still running
//! are skipped rather than queued or overlapped.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use log::debug;
use log::error;
use log::info;
use tokio::sync::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use crate::task::Task;

struct Running {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Running {
    /// Loop still alive and not asked to stop.
    fn is_active(&self) -> bool {
        !self.handle.is_finished() && !*self.stop_tx.borrow()
    }
}

pub struct Scheduler {
    name: String,
    interval: Duration,
    running: Mutex<Option<Running>>,
}

impl Scheduler {
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        let name = name.into();
        info!("Initializing {name} scheduler with interval {interval:?}");
        Self {
            name,
            interval,
            running: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(Running::is_active)
    }

    /// Arms the timer. Returns `false` if the loop was already running.
    ///
    /// If a stopped loop is still finishing its last cycle, waits for it first
    /// so two cycles of the same task never run at once.
    pub async fn start(&self, task: Arc<dyn Task>) -> bool {
        let mut running = self.running.lock().await;
        if running.as_ref().is_some_and(Running::is_active) {
            debug!("{} scheduler is already running", self.name);
            return false;
        }
        if let Some(previous) = running.take()
            && !previous.handle.is_finished()
        {
            info!("Waiting for the previous {} cycle to finish.", self.name);
            if let Err(e) = previous.handle.await {
                error!("Previous {} check loop ended abnormally: {e}", self.name);
            }
        }

        info!("Starting {} check loop for task {}.", self.name, task.name());
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(Self::check_loop(
            self.name.clone(),
            self.interval,
            task,
            stop_rx,
        ));
        *running = Some(Running { stop_tx, handle });
        true
    }

    /// Clears the timer. A cycle already in flight finishes on its own.
    ///
    /// Returns `false` if the loop was not running.
    pub async fn stop(&self) -> bool {
        let running = self.running.lock().await;
        let Some(current) = running.as_ref().filter(|r| r.is_active()) else {
            return false;
        };
        info!("Stopping {} check loop.", self.name);
        // The receiver is gone only if the loop already exited.
        let _ = current.stop_tx.send(true);
        true
    }

    async fn check_loop(
        name: String,
        period: Duration,
        task: Arc<dyn Task>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                _ = interval.tick() => {}
            }
            if *stop_rx.borrow() {
                break;
            }

            let span = tracing::info_span!("poll_cycle", connector = %name);
            let cycle = AssertUnwindSafe(task.run()).catch_unwind();
            match cycle.instrument(span).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Error running {name} cycle: {e:#}"),
                Err(_) => error!("{name} cycle panicked. The loop keeps running."),
            }
        }
        info!("Stopped {name} check loop.");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use async_trait::async_trait;

    use super::*;

    struct CountingTask {
        runs: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Task for CountingTask {
        fn name(&self) -> &str {
            "counting"
        }

        async fn run(&self) -> anyhow::Result<()> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                if run % 2 == 0 {
                    panic!("cycle {run} exploded");
                }
                anyhow::bail!("cycle {run} failed");
            }
            Ok(())
        }
    }

    fn task(fail: bool) -> Arc<CountingTask> {
        Arc::new(CountingTask {
            runs: AtomicUsize::new(0),
            fail,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_immediately_then_on_interval() {
        let scheduler = Scheduler::new("test", Duration::from_secs(60));
        let task = task(false);

        assert!(scheduler.start(task.clone()).await);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(task.runs.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(task.runs.load(Ordering::SeqCst), 2);
        assert!(scheduler.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop_are_idempotent() {
        let scheduler = Scheduler::new("test", Duration::from_secs(10));
        let task = task(false);

        assert!(!scheduler.stop().await);
        assert!(scheduler.start(task.clone()).await);
        assert!(!scheduler.start(task.clone()).await);
        assert!(scheduler.is_running().await);

        assert!(scheduler.stop().await);
        assert!(!scheduler.stop().await);
        assert!(!scheduler.is_running().await);

        let runs = task.runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(task.runs.load(Ordering::SeqCst), runs);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_cycles_do_not_kill_the_loop() {
        let scheduler = Scheduler::new("test", Duration::from_secs(5));
        let task = task(true);

        scheduler.start(task.clone()).await;
        tokio::time::sleep(Duration::from_secs(21)).await;
        assert_eq!(task.runs.load(Ordering::SeqCst), 5);
        assert!(scheduler.is_running().await);
        scheduler.stop().await;
    }

    struct SlowTask {
        runs: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    #[async_trait]
    impl Task for SlowTask {
        fn name(&self) -> &str {
            "slow"
        }

        async fn run(&self) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(30)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_waits_for_in_flight_cycle() {
        let scheduler = Scheduler::new("test", Duration::from_secs(60));
        let task = Arc::new(SlowTask {
            runs: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        });

        assert!(scheduler.start(task.clone()).await);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(scheduler.stop().await);
        assert!(!scheduler.is_running().await);

        let restarted_at = tokio::time::Instant::now();
        assert!(scheduler.start(task.clone()).await);
        assert!(restarted_at.elapsed() >= Duration::from_secs(29));
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(task.runs.load(Ordering::SeqCst), 2);
        assert_eq!(task.max_active.load(Ordering::SeqCst), 1);
        assert!(scheduler.is_running().await);
        scheduler.stop().await;
    }
}
