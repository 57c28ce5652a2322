//! # Application State Management
//!
//! State shared by every HTTP handler and WebSocket connection. It deliberately
//! holds nothing that belongs to a single translation session: each session owns
//! its own flags, identifiers and queues (see `translation::session`). What lives
//! here is process-level bookkeeping only:
//!
//! - the loaded configuration (read-only after startup)
//! - request metrics recorded by the metrics middleware
//! - session admission control and counters
//!
//! ## Arc + atomics:
//! Counters that are touched on every session start/end are plain atomics, so
//! admitting a session never waits on a lock. Per-endpoint metrics need a map and
//! sit behind a `RwLock`.

use crate::config::AppConfig;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

/// The main application state that's shared across all request handlers.
///
/// Cloning is cheap: every field is behind an `Arc` or is `Copy`.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration, fixed for the life of the process
    pub config: Arc<AppConfig>,

    /// HTTP request metrics
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Translation session counters
    sessions: Arc<SessionCounters>,

    /// When the server started
    pub start_time: Instant,
}

/// HTTP request metrics collected by the metrics middleware.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of 4xx/5xx responses since server start
    pub error_count: u64,

    /// Key: endpoint name (e.g., "GET /health")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

#[derive(Debug, Default)]
struct SessionCounters {
    active: AtomicUsize,
    started: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time view of the session counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub active: usize,
    pub started: u64,
    pub failed: u64,
    pub max: usize,
}

/// Proof that a translation session slot is held.
///
/// The slot is released when the permit is dropped, which happens when the
/// session task finishes no matter how it ended.
#[derive(Debug)]
pub struct SessionPermit {
    sessions: Arc<SessionCounters>,
}

impl Drop for SessionPermit {
    fn drop(&mut self) {
        self.sessions.active.fetch_sub(1, Ordering::AcqRel);
    }
}

impl SessionPermit {
    /// Count the session this permit guards as failed.
    pub fn mark_failed(&self) {
        self.sessions.failed.fetch_add(1, Ordering::Relaxed);
    }
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            sessions: Arc::new(SessionCounters::default()),
            start_time: Instant::now(),
        }
    }

    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    /// Reserve a session slot, or `None` when `max_concurrent_sessions` are running.
    ///
    /// ## Rust Concepts:
    /// - **compare_exchange loop**: increments only if the count is still below
    ///   the limit, so two racing upgrades can't both take the last slot
    pub fn try_acquire_session(&self) -> Option<SessionPermit> {
        let max = self.config.session.max_concurrent_sessions;
        let mut current = self.sessions.active.load(Ordering::Acquire);
        loop {
            if current >= max {
                return None;
            }
            match self.sessions.active.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        self.sessions.started.fetch_add(1, Ordering::Relaxed);
        Some(SessionPermit {
            sessions: self.sessions.clone(),
        })
    }

    pub fn session_snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            active: self.sessions.active.load(Ordering::Acquire),
            started: self.sessions.started.load(Ordering::Relaxed),
            failed: self.sessions.failed.load(Ordering::Relaxed),
            max: self.config.session.max_concurrent_sessions,
        }
    }

    /// Record one finished HTTP request.
    ///
    /// A poisoned lock only means another request panicked mid-update; the
    /// counters are still usable, so the guard is recovered instead of panicking.
    pub fn record_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.request_count += 1;
        if is_error {
            metrics.error_count += 1;
        }

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_limit(max: usize) -> AppState {
        let mut config = AppConfig::default();
        config.session.max_concurrent_sessions = max;
        AppState::new(config)
    }

    #[test]
    fn test_session_limit_is_enforced() {
        let state = state_with_limit(2);

        let first = state.try_acquire_session();
        let second = state.try_acquire_session();
        assert!(first.is_some());
        assert!(second.is_some());
        assert!(state.try_acquire_session().is_none());
        assert_eq!(state.session_snapshot().active, 2);
    }

    #[test]
    fn test_dropping_permit_frees_slot() {
        let state = state_with_limit(1);

        let permit = state.try_acquire_session().expect("first slot");
        assert!(state.try_acquire_session().is_none());

        permit.mark_failed();
        drop(permit);

        let snapshot = state.session_snapshot();
        assert_eq!(snapshot.active, 0);
        assert_eq!(snapshot.started, 1);
        assert_eq!(snapshot.failed, 1);
        assert!(state.try_acquire_session().is_some());
    }

    #[test]
    fn test_record_request() {
        let state = state_with_limit(1);
        state.record_request("GET /health", 4, false);
        state.record_request("GET /health", 6, true);

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.request_count, 2);
        assert_eq!(metrics.error_count, 1);

        let health = &metrics.endpoint_metrics["GET /health"];
        assert_eq!(health.average_duration_ms(), 5.0);
        assert_eq!(health.error_rate(), 0.5);
    }
}
