//! The boundary between the engine and the test body.
//!
//! A test is any `FnMut(&mut ConjectureData) -> TestResult`. Whatever it
//! does (returns, fails, bails out with `?` on a [`StopTest`], or panics)
//! is turned into a [`ConjectureResult`] here and nowhere else.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use crate::data::{ConjectureData, ConjectureResult, InterestingOrigin, Status, StopTest};

/// Why a test body did not return normally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestFailure {
    /// The execution was stopped by the engine. Its status is already known.
    Stop(StopTest),
    /// The test failed with this label. Distinct labels are distinct bugs.
    Failed(String),
}

impl TestFailure {
    pub fn failed(label: impl Into<String>) -> Self {
        TestFailure::Failed(label.into())
    }
}

impl From<StopTest> for TestFailure {
    fn from(stop: StopTest) -> Self {
        TestFailure::Stop(stop)
    }
}

impl fmt::Display for TestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestFailure::Stop(stop) => write!(f, "{}", stop),
            TestFailure::Failed(label) => write!(f, "test failed: {}", label),
        }
    }
}

impl std::error::Error for TestFailure {}

pub type TestResult = Result<(), TestFailure>;

#[derive(Debug, Clone)]
struct CapturedPanic {
    location: String,
    message: String,
}

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
    static LAST_PANIC: RefCell<Option<CapturedPanic>> = const { RefCell::new(None) };
}

static INSTALL_HOOK: Once = Once::new();

/// Install a panic hook that records panics raised inside engine
/// executions instead of printing them. Panics anywhere else go to the
/// previously installed hook.
fn install_panic_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if CAPTURING.with(Cell::get) {
                let location = info
                    .location()
                    .map(|l| format!("{}:{}", l.file(), l.line()))
                    .unwrap_or_else(|| "<unknown>".to_string());
                let message = payload_message(info.payload());
                LAST_PANIC.with(|last| *last.borrow_mut() = Some(CapturedPanic { location, message }));
            } else {
                previous(info);
            }
        }));
    });
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

/// Resets the capture flag even if the test unwinds through us.
struct CaptureGuard;

impl CaptureGuard {
    fn enter() -> Self {
        CAPTURING.with(|c| c.set(true));
        LAST_PANIC.with(|last| last.borrow_mut().take());
        CaptureGuard
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        CAPTURING.with(|c| c.set(false));
    }
}

/// Run `test` once against `data` and classify the outcome.
pub fn execute<F>(test: &mut F, mut data: ConjectureData<'_>) -> ConjectureResult
where
    F: FnMut(&mut ConjectureData<'_>) -> TestResult,
{
    install_panic_hook();
    let outcome = {
        let _guard = CaptureGuard::enter();
        panic::catch_unwind(AssertUnwindSafe(|| test(&mut data)))
    };

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(TestFailure::Stop(_))) => {
            if data.status().is_none() {
                // A StopTest from some other execution was returned here.
                log::warn!("test returned a stop signal its own data never raised");
                data.conclude(Status::Invalid);
            }
        }
        Ok(Err(TestFailure::Failed(label))) => {
            data.conclude(Status::Interesting(InterestingOrigin::Failure(label)));
        }
        Err(payload) => {
            let captured = LAST_PANIC.with(|last| last.borrow_mut().take()).unwrap_or_else(|| CapturedPanic {
                location: "<unknown>".to_string(),
                message: payload_message(payload.as_ref()),
            });
            data.note(format!("panicked at {}: {}", captured.location, captured.message));
            data.conclude(Status::Interesting(InterestingOrigin::Panic { location: captured.location }));
        }
    }

    let deadline = data.deadline();
    let mut result = data.freeze();
    if let (Some(deadline), Status::Valid) = (deadline, &result.status) {
        if result.runtime > deadline {
            log::debug!("execution took {:?}, over the {:?} deadline", result.runtime, deadline);
            result.status = Status::Interesting(InterestingOrigin::DeadlineExceeded);
        }
    }
    log::debug!("executed {} choices: {}", result.len(), result.status);
    result
}
