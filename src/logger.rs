//! Logging and metrics support.

use dogstatsd::{Client, Options};
use once_cell::sync::Lazy;
use std::{
    sync::{atomic::AtomicBool, OnceLock},
    time::{Duration, Instant, SystemTime},
};
use tracing_subscriber::EnvFilter;

/// The global suppress flag for statsd metrics.
pub static DATADOG_SUPPRESS: AtomicBool = AtomicBool::new(false);

/// Helper macro to increment a statsd counter.
#[macro_export]
macro_rules! dd_incr {
    ($key:literal $(, $tag:expr)*) => {
        if !$crate::logger::DATADOG_SUPPRESS.load(std::sync::atomic::Ordering::Relaxed) {
            let tags: &[&str] = &[$($tag),*];
            if let Err(err) = $crate::logger::DATADOG.incr(concat!("kiosk.", $key), tags) {
                ::tracing::error!("statsd incr reporting failed: {err:#?}");
            }
        }
    };
}

/// Helper macro to send a statsd timing metric.
#[macro_export]
macro_rules! dd_timing {
    ($key:literal, $t:expr $(, $tag:expr)*) => {
        if !$crate::logger::DATADOG_SUPPRESS.load(std::sync::atomic::Ordering::Relaxed) {
            let tags: &[&str] = &[$($tag),*];
            if let Err(err) = $crate::logger::DATADOG.timing(
                concat!("kiosk.", $key),
                $crate::logger::TimeElapsed::elapsed(&$t),
                tags,
            ) {
                ::tracing::error!("statsd timing reporting failed: {err:#?}");
            }
        }
    };
}

/// Helper macro to send a statsd gauge metric.
#[macro_export]
macro_rules! dd_gauge {
    ($key:literal, $value:expr $(, $tag:expr)*) => {
        if !$crate::logger::DATADOG_SUPPRESS.load(std::sync::atomic::Ordering::Relaxed) {
            let tags: &[&str] = &[$($tag),*];
            if let Err(err) =
                $crate::logger::DATADOG.gauge(concat!("kiosk.", $key), $value, tags)
            {
                ::tracing::error!("statsd gauge reporting failed: {err:#?}");
            }
        }
    };
}

/// Shared statsd client.
pub static DATADOG: Lazy<Client> = Lazy::new(|| {
    Client::new(Options::default()).expect("statsd client construction cannot fail")
});

/// A helper trait to get the elapsed time in milliseconds as an i64.
pub trait TimeElapsed {
    /// Gets the time elapsed in milliseconds as an i64.
    fn elapsed(&self) -> i64;
}

impl TimeElapsed for Instant {
    fn elapsed(&self) -> i64 {
        self.elapsed().as_millis().try_into().unwrap_or(i64::MAX)
    }
}

impl TimeElapsed for SystemTime {
    fn elapsed(&self) -> i64 {
        self.elapsed().unwrap_or(Duration::MAX).as_millis().try_into().unwrap_or(i64::MAX)
    }
}

impl TimeElapsed for Duration {
    fn elapsed(&self) -> i64 {
        self.as_millis().try_into().unwrap_or(i64::MAX)
    }
}

const DEFAULT_LOG_FILTER: &str = "info,kiosk=debug";

/// Initializes the global tracing subscriber. Idempotent.
pub fn init() {
    static INITIALIZED: OnceLock<()> = OnceLock::new();
    INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_names(true)
            .init();
    });
}
