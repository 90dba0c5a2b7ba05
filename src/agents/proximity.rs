//! Proximity sensing.
//!
//! A pluggable distance provider is polled at a fixed rate; the raw
//! samples are debounced into near/far transition events. Temporary
//! sensor unavailability shows up as a silent period, never as a false
//! trigger.

use crate::{
    consts::{PROXIMITY_BACKOFF_CAP, PROXIMITY_FAILURE_SIGNAL_COUNT, PROXIMITY_SYSFS_PATH},
    dd_incr,
};
use eyre::{ensure, Result};
use std::{
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};
use tokio::task;
use tokio_util::sync::CancellationToken;

/// Distance measurement capability.
///
/// `None` marks a failed read; the poll loop treats it as transient.
#[cfg_attr(test, mockall::automock)]
pub trait DistanceProvider: Send {
    /// Reads the current distance in millimeters.
    fn read_distance_mm(&mut self) -> Option<u16>;
}

/// Classification of a distance sample against the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sample {
    Near,
    Far,
}

/// Debounce state machine over classified samples.
///
/// A classification must persist for the debounce window before it
/// becomes an event; a contrary sample resets the pending timer.
#[derive(Debug)]
pub struct Debouncer {
    threshold_mm: u16,
    debounce: Duration,
    emitted: Option<Sample>,
    pending: Option<(Sample, Instant)>,
}

impl Debouncer {
    /// Creates a debouncer in the unknown state.
    #[must_use]
    pub fn new(threshold_mm: u16, debounce: Duration) -> Self {
        Self { threshold_mm, debounce, emitted: None, pending: None }
    }

    /// Feeds one sample. Returns `Some(triggered)` when a transition
    /// becomes an event.
    pub fn update(&mut self, distance_mm: u16, now: Instant) -> Option<bool> {
        // At exactly the threshold the sample classifies as near.
        let sample =
            if distance_mm <= self.threshold_mm { Sample::Near } else { Sample::Far };
        if self.emitted == Some(sample) {
            self.pending = None;
            return None;
        }
        match self.pending {
            Some((pending, since)) if pending == sample => {
                if now.duration_since(since) >= self.debounce {
                    self.emitted = Some(sample);
                    self.pending = None;
                    Some(sample == Sample::Near)
                } else {
                    None
                }
            }
            _ => {
                self.pending = Some((sample, now));
                None
            }
        }
    }
}

/// Handle to a running proximity poll loop. Dropping stops the loop.
#[derive(Debug)]
pub struct ProximityHandle {
    cancel: CancellationToken,
}

impl ProximityHandle {
    /// Stops the poll loop.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ProximityHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Debounced near/far event source over a distance provider.
pub struct ProximitySource {
    provider: Box<dyn DistanceProvider>,
    threshold_mm: u16,
    debounce: Duration,
    poll_interval: Duration,
    on_health: Box<dyn Fn(u32) + Send>,
}

impl ProximitySource {
    /// Creates a source polling `provider` at `poll_hz`.
    #[must_use]
    pub fn new(
        provider: Box<dyn DistanceProvider>,
        threshold_mm: u16,
        debounce: Duration,
        poll_hz: u32,
    ) -> Self {
        Self {
            provider,
            threshold_mm,
            debounce,
            poll_interval: Duration::from_secs(1) / poll_hz.max(1),
            on_health: Box::new(|failures| {
                tracing::warn!("proximity sensor unhealthy after {failures} failed reads");
                dd_incr!("main.count.proximity.unhealthy");
            }),
        }
    }

    /// Replaces the health callback invoked on sustained read failure.
    #[must_use]
    pub fn on_health(mut self, on_health: impl Fn(u32) + Send + 'static) -> Self {
        self.on_health = Box::new(on_health);
        self
    }

    /// Starts the poll loop on the blocking executor.
    ///
    /// `on_event(triggered, distance_mm)` fires at most once per debounced
    /// transition. The loop runs until the returned handle stops it.
    pub fn start(self, on_event: impl Fn(bool, u16) + Send + 'static) -> ProximityHandle {
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let Self { mut provider, threshold_mm, debounce, poll_interval, on_health } = self;
        task::spawn_blocking(move || {
            let mut debouncer = Debouncer::new(threshold_mm, debounce);
            let mut consecutive_failures: u32 = 0;
            let mut backoff = poll_interval;
            while !loop_cancel.is_cancelled() {
                match provider.read_distance_mm() {
                    Some(distance_mm) => {
                        consecutive_failures = 0;
                        backoff = poll_interval;
                        if let Some(triggered) = debouncer.update(distance_mm, Instant::now()) {
                            tracing::info!(
                                "proximity {} at {distance_mm} mm",
                                if triggered { "trigger" } else { "release" }
                            );
                            on_event(triggered, distance_mm);
                        }
                        thread::sleep(poll_interval);
                    }
                    None => {
                        consecutive_failures += 1;
                        tracing::debug!(
                            "proximity read failed ({consecutive_failures} consecutive)"
                        );
                        if consecutive_failures == PROXIMITY_FAILURE_SIGNAL_COUNT {
                            on_health(consecutive_failures);
                        }
                        thread::sleep(backoff);
                        backoff = (backoff * 2).min(PROXIMITY_BACKOFF_CAP);
                    }
                }
            }
        });
        ProximityHandle { cancel }
    }
}

/// Provider reading the Linux IIO distance channel from sysfs.
#[derive(Debug)]
pub struct IioProvider {
    path: PathBuf,
}

impl IioProvider {
    /// Probes the default sysfs node; fails fast when the driver is
    /// missing so startup can abort with a hardware error.
    pub fn probe() -> Result<Self> {
        Self::probe_at(PathBuf::from(PROXIMITY_SYSFS_PATH))
    }

    /// Probes a specific sysfs node.
    pub fn probe_at(path: PathBuf) -> Result<Self> {
        ensure!(path.exists(), "proximity sensor driver missing at {}", path.display());
        Ok(Self { path })
    }
}

impl DistanceProvider for IioProvider {
    fn read_distance_mm(&mut self) -> Option<u16> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        raw.trim().parse::<u32>().ok().map(|mm| mm.min(u32::from(u16::MAX)) as u16)
    }
}

/// Provider replaying a fixed sample script, then holding the last value.
#[derive(Debug)]
pub struct ScriptedProvider {
    samples: Vec<Option<u16>>,
    index: usize,
}

impl ScriptedProvider {
    /// Creates a provider over the given samples.
    #[must_use]
    pub fn new(samples: Vec<Option<u16>>) -> Self {
        Self { samples, index: 0 }
    }
}

impl DistanceProvider for ScriptedProvider {
    fn read_distance_mm(&mut self) -> Option<u16> {
        let sample = self.samples.get(self.index).copied().flatten();
        if self.index + 1 < self.samples.len() {
            self.index += 1;
        }
        sample
    }
}
