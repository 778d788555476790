use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Sender, select};
use parking_lot::Mutex;

use crate::coordinator::MovementCoordinator;

/// Result of one full awareness sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Entities whose awareness was recomputed.
    pub entities: usize,
    pub appeared: usize,
    pub disappeared: usize,
    pub elapsed: Duration,
}

/// Running totals over every sweep a [`Sweeper`] has finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepTimings {
    pub sweeps: usize,
    pub total: Duration,
    pub max: Duration,
}

impl SweepTimings {
    pub fn record(&mut self, elapsed: Duration) {
        self.sweeps += 1;
        self.total += elapsed;
        self.max = self.max.max(elapsed);
    }

    pub fn average(&self) -> Duration {
        let sweeps = u32::try_from(self.sweeps).unwrap_or(u32::MAX);
        self.total.checked_div(sweeps).unwrap_or(Duration::ZERO)
    }
}

/// Background thread running [`MovementCoordinator::refresh_all`] every
/// `sweep_interval_ms`. Stops when dropped.
pub struct Sweeper {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    timings: Arc<Mutex<SweepTimings>>,
}

impl Sweeper {
    pub fn spawn(coordinator: Arc<MovementCoordinator>) -> std::io::Result<Self> {
        let interval = coordinator.config().sweep_interval();
        let (shutdown, stop) = crossbeam_channel::bounded::<()>(0);
        let timings = Arc::new(Mutex::new(SweepTimings::default()));
        let shared = Arc::clone(&timings);

        let handle = thread::Builder::new()
            .name("awareness-sweep".into())
            .spawn(move || {
                let ticker = crossbeam_channel::tick(interval);
                tracing::info!(interval_ms = interval.as_millis() as u64, "awareness sweep started");
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            let stats = coordinator.refresh_all();
                            shared.lock().record(stats.elapsed);
                        }
                        // disconnect is the stop signal
                        recv(stop) -> _ => break,
                    }
                }
                tracing::info!("awareness sweep stopped");
            })?;

        Ok(Self {
            shutdown: Some(shutdown),
            handle: Some(handle),
            timings,
        })
    }

    pub fn timings(&self) -> SweepTimings {
        *self.timings.lock()
    }

    /// Stop the thread and wait for the sweep in progress to finish.
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        self.shutdown.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("awareness sweep thread panicked");
            }
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use interest_awareness::notify;
    use std::time::Instant;

    #[test]
    fn timings_track_average_and_max() {
        let mut timings = SweepTimings::default();
        assert_eq!(timings.average(), Duration::ZERO);
        timings.record(Duration::from_millis(2));
        timings.record(Duration::from_millis(7));
        timings.record(Duration::from_millis(3));
        assert_eq!(timings.sweeps, 3);
        assert_eq!(timings.average(), Duration::from_millis(4));
        assert_eq!(timings.max, Duration::from_millis(7));
    }

    #[test]
    fn sweeper_runs_and_stops() {
        let (tx, _rx) = notify::channel();
        let config = EngineConfig {
            sweep_interval_ms: 5,
            ..EngineConfig::default()
        };
        let coordinator = Arc::new(MovementCoordinator::new(config, Arc::new(tx)).unwrap());
        let sweeper = Sweeper::spawn(Arc::clone(&coordinator)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while sweeper.timings().sweeps == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(sweeper.timings().sweeps > 0);
        sweeper.stop();
        // the thread released its handle
        assert_eq!(Arc::strong_count(&coordinator), 1);
    }
}
