//! Shared fault state and fault reports.
//!
//! A worker never lets an error or a panic escape its thread. It converts the
//! failure into a [`FaultReport`] and publishes it into the run's
//! [`FaultState`]. The first report wins; later ones are dropped, which is
//! acceptable because the run is already failing fast.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::RefCell;
use std::error::Error as StdError;
use std::fmt::Write as _;
use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

/// Boxed error accepted from fallible user closures.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// A captured worker fault, safe to move across threads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultReport {
    /// Name of the stage whose worker faulted.
    pub stage: String,
    /// Index of the faulted worker within its stage.
    pub worker_index: usize,
    /// Error type name, or `"panic"`.
    pub kind: String,
    /// The error's display message.
    pub message: String,
    /// Formatted trace text: location, cause chain and backtrace if captured.
    pub trace: String,
    /// When the fault was captured.
    pub occurred_at: DateTime<Utc>,
}

impl FaultReport {
    pub(crate) fn new(stage: &str, worker_index: usize, workers: usize, failure: Failure) -> Self {
        let mut trace = format!(
            "stage '{stage}' worker {worker_index} of {workers}\n{}: {}",
            failure.kind, failure.message
        );
        trace.push_str(&failure.detail);

        Self {
            stage: stage.to_string(),
            worker_index,
            kind: failure.kind,
            message: failure.message,
            trace,
            occurred_at: Utc::now(),
        }
    }

    /// Placeholder for a run flagged as faulted whose report slot is empty.
    pub(crate) fn unreported() -> Self {
        Self {
            stage: "unknown".to_string(),
            worker_index: 0,
            kind: "unknown".to_string(),
            message: "worker faulted without a report".to_string(),
            trace: String::new(),
            occurred_at: Utc::now(),
        }
    }

    /// Converts the report to a JSON value for event payloads.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "stage": self.stage,
            "worker": self.worker_index,
            "kind": self.kind,
            "message": self.message,
            "occurred_at": self.occurred_at.to_rfc3339(),
        })
    }
}

/// A failure captured inside a worker, before it is tied to a stage.
#[derive(Debug, Clone)]
pub(crate) struct Failure {
    pub(crate) kind: String,
    pub(crate) message: String,
    pub(crate) detail: String,
}

impl Failure {
    /// Captures an error returned by a fallible user closure.
    pub(crate) fn from_error<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        let kind = std::any::type_name::<E>().to_string();
        let err: BoxError = err.into();

        let mut detail = String::new();
        let mut source = err.source();
        if source.is_some() {
            detail.push_str("\n\nCaused by:");
        }
        let mut depth = 0;
        while let Some(cause) = source {
            let _ = write!(detail, "\n    {depth}: {cause}");
            depth += 1;
            source = cause.source();
        }
        push_backtrace(&mut detail);

        Self {
            kind,
            message: err.to_string(),
            detail,
        }
    }

    /// Captures the payload of a panic caught at the worker boundary.
    ///
    /// If [`install_panic_hook`] is active, the location (and backtrace, when
    /// enabled) recorded for the last panic on this thread is appended.
    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());

        let mut detail = String::new();
        if let Some(site) = take_panic_site() {
            let _ = write!(detail, "\n    at {}", site.location);
            if let Some(backtrace) = site.backtrace {
                let _ = write!(detail, "\n\nBacktrace:\n{backtrace}");
            }
        }

        Self {
            kind: "panic".to_string(),
            message,
            detail,
        }
    }
}

/// Where the last panic on a thread was raised.
#[derive(Debug)]
struct PanicSite {
    location: String,
    backtrace: Option<String>,
}

thread_local! {
    static PANIC_SITE: RefCell<Option<PanicSite>> = const { RefCell::new(None) };
}

/// Installs a process-wide panic hook that records each panic's location
/// on the panicking thread, then defers to the previously installed hook.
///
/// Idempotent.
pub(crate) fn install_panic_hook() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let original_hook = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let location = info
                .location()
                .map_or_else(|| "unknown location".to_string(), ToString::to_string);
            let backtrace = Backtrace::capture();
            let backtrace =
                (backtrace.status() == BacktraceStatus::Captured).then(|| backtrace.to_string());
            let _ = PANIC_SITE.try_with(|site| {
                if let Ok(mut site) = site.try_borrow_mut() {
                    *site = Some(PanicSite { location, backtrace });
                }
            });
            original_hook(info);
        }));
    });
}

fn take_panic_site() -> Option<PanicSite> {
    PANIC_SITE
        .try_with(|site| site.try_borrow_mut().ok().and_then(|mut site| site.take()))
        .ok()
        .flatten()
}

fn push_backtrace(detail: &mut String) {
    let backtrace = Backtrace::capture();
    if backtrace.status() == BacktraceStatus::Captured {
        let _ = write!(detail, "\n\nBacktrace:\n{backtrace}");
    }
}

/// Run-wide fault flag plus the write-once report slot.
#[derive(Debug, Default)]
pub struct FaultState {
    faulted: AtomicBool,
    report: RwLock<Option<FaultReport>>,
}

impl FaultState {
    /// Creates a clean fault state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a report. Only the first report is kept.
    ///
    /// The report is stored before the flag is raised, so anyone observing
    /// the flag can read the report. Returns true if this report was kept.
    pub fn publish(&self, report: FaultReport) -> bool {
        let mut slot = self.report.write();
        if slot.is_some() {
            return false;
        }
        *slot = Some(report);
        self.faulted.store(true, Ordering::SeqCst);
        true
    }

    /// Returns whether any worker has faulted.
    #[must_use]
    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::SeqCst)
    }

    /// Returns the published report, if any.
    #[must_use]
    pub fn report(&self) -> Option<FaultReport> {
        self.report.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Debug, thiserror::Error)]
    #[error("outer failure")]
    struct Outer(#[source] std::io::Error);

    fn report(kind: &str) -> FaultReport {
        FaultReport::new(
            "map-1",
            0,
            2,
            Failure {
                kind: kind.to_string(),
                message: "boom".to_string(),
                detail: String::new(),
            },
        )
    }

    #[test]
    fn test_failure_from_error_keeps_kind_and_chain() {
        let err = Outer(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"));
        let failure = Failure::from_error(err);

        assert!(failure.kind.ends_with("Outer"));
        assert_eq!(failure.message, "outer failure");
        assert!(failure.detail.contains("Caused by:"));
        assert!(failure.detail.contains("disk gone"));
    }

    #[test]
    fn test_failure_from_str_error() {
        let failure = Failure::from_error("plain message");
        assert_eq!(failure.kind, "&str");
        assert_eq!(failure.message, "plain message");
    }

    #[test]
    fn test_failure_from_panic_payloads() {
        let static_payload: Box<dyn Any + Send> = Box::new("static text");
        assert_eq!(Failure::from_panic(static_payload.as_ref()).message, "static text");

        let owned_payload: Box<dyn Any + Send> = Box::new(String::from("owned text"));
        let failure = Failure::from_panic(owned_payload.as_ref());
        assert_eq!(failure.kind, "panic");
        assert_eq!(failure.message, "owned text");
    }

    #[test]
    fn test_failure_from_panic_records_location() {
        fn explode() {
            panic!("bad input");
        }

        install_panic_hook();
        let payload = panic::catch_unwind(explode).unwrap_err();

        let failure = Failure::from_panic(payload.as_ref());
        assert_eq!(failure.message, "bad input");
        assert!(failure.detail.contains("fault.rs"), "detail: {}", failure.detail);

        let again = Failure::from_panic(payload.as_ref());
        assert!(again.detail.is_empty());
    }

    #[test]
    fn test_report_trace_names_stage_and_worker() {
        let report = report("ValueError");
        assert!(report.trace.starts_with("stage 'map-1' worker 0 of 2"));
        assert!(report.trace.contains("ValueError: boom"));
        assert_eq!(report.to_value()["kind"], "ValueError");
    }

    #[test]
    fn test_first_report_wins() {
        let state = FaultState::new();
        assert!(!state.is_faulted());

        assert!(state.publish(report("First")));
        assert!(!state.publish(report("Second")));

        assert!(state.is_faulted());
        assert_eq!(state.report().map(|r| r.kind), Some("First".to_string()));
    }

    #[test]
    fn test_concurrent_publish_keeps_exactly_one() {
        let state = Arc::new(FaultState::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let state = state.clone();
                std::thread::spawn(move || state.publish(report(&format!("Kind{i}"))))
            })
            .collect();

        let kept = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|kept| *kept)
            .count();

        assert_eq!(kept, 1);
        assert!(state.report().is_some());
    }
}
