//! Test lifecycle controller.
//!
//! Drives one deliverability test through
//! `Idle -> Generating -> Generated -> Detecting -> Completed | Failed`,
//! polling the remote service while detection runs.
//!
//! The session lives in a `tokio::sync::watch` channel: the controller is
//! its only writer and callers read snapshots or subscribe to changes.
//! Each fetch takes a sequence number before it is sent. Progress updates
//! apply only if no newer fetch has been applied; terminal transitions apply
//! whenever the session is not yet terminal; nothing applies after the
//! session is terminal or the controller is disposed.

use async_trait::async_trait;
use chrono::Utc;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::TestService;
use crate::config::PollingConfig;
use crate::error::{
    ErrorDescriptor, ErrorKind, InboxCheckError, LifecycleError, ServiceError, ValidationError,
};
use crate::types::{
    DetectionStatus, LifecycleState, Progress, StatusReport, TestCode, TestResults, TestSession,
};

/// Receives lifecycle events for presentation. All methods default to no-ops.
#[async_trait]
pub trait LifecycleCallback: Send + Sync {
    async fn on_state_change(&self, _from: LifecycleState, _to: LifecycleState) {}

    /// A status check reported progress.
    async fn on_progress(&self, _progress: &Progress, _status: &DetectionStatus) {}

    /// A fetch failed but the session carries on.
    async fn on_transient_error(&self, _error: &ServiceError, _consecutive: u32) {}

    async fn on_completed(&self, _session: &TestSession) {}

    async fn on_failed(&self, _session: &TestSession) {}
}

/// A callback that ignores every event.
pub struct NoOpCallback;

#[async_trait]
impl LifecycleCallback for NoOpCallback {}

/// An event captured by [`RecordingCallback`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    StateChanged {
        from: LifecycleState,
        to: LifecycleState,
    },
    Progress(Progress),
    TransientError {
        kind: ErrorKind,
        consecutive: u32,
    },
    Completed {
        score: Option<u8>,
    },
    Failed {
        kind: Option<ErrorKind>,
    },
}

/// A callback that records all events for test assertions.
#[derive(Default)]
pub struct RecordingCallback {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().unwrap().clone()
    }

    /// States entered, in order.
    pub fn states(&self) -> Vec<LifecycleState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                LifecycleEvent::StateChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: LifecycleEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl LifecycleCallback for RecordingCallback {
    async fn on_state_change(&self, from: LifecycleState, to: LifecycleState) {
        self.push(LifecycleEvent::StateChanged { from, to });
    }

    async fn on_progress(&self, progress: &Progress, _status: &DetectionStatus) {
        self.push(LifecycleEvent::Progress(*progress));
    }

    async fn on_transient_error(&self, error: &ServiceError, consecutive: u32) {
        self.push(LifecycleEvent::TransientError {
            kind: error.kind(),
            consecutive,
        });
    }

    async fn on_completed(&self, session: &TestSession) {
        self.push(LifecycleEvent::Completed {
            score: session.final_score(),
        });
    }

    async fn on_failed(&self, session: &TestSession) {
        self.push(LifecycleEvent::Failed {
            kind: session.last_error.as_ref().map(|e| e.kind),
        });
    }
}

/// Why a session ended in `Failed`.
#[derive(Debug, Clone)]
enum Failure {
    Service(ServiceError),
    Lifecycle(LifecycleError),
}

impl Failure {
    fn descriptor(&self) -> ErrorDescriptor {
        match self {
            Failure::Service(e) => e.into(),
            Failure::Lifecycle(e) => e.into(),
        }
    }
}

impl From<Failure> for InboxCheckError {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::Service(e) => e.into(),
            Failure::Lifecycle(e) => e.into(),
        }
    }
}

/// Clears an in-flight flag when dropped.
struct FlagGuard<'a>(&'a AtomicBool);

impl<'a> FlagGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        (!flag.swap(true, Ordering::AcqRel)).then(|| Self(flag))
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Controller for one test session.
pub struct TestLifecycle {
    service: Arc<dyn TestService>,
    config: PollingConfig,
    callback: Arc<dyn LifecycleCallback>,
    session: watch::Sender<TestSession>,
    cancellation: CancellationToken,
    seq: AtomicU64,
    failure: Mutex<Option<Failure>>,
    detect_in_flight: AtomicBool,
    polling: AtomicBool,
}

impl TestLifecycle {
    /// A controller for a new test, starting in `Idle`.
    pub fn new(service: Arc<dyn TestService>, config: PollingConfig) -> Self {
        Self::with_session(service, config, TestSession::new(""))
    }

    /// A controller for a code generated earlier whose detection has not
    /// been started. Starts in `Generated`.
    pub fn from_code(
        service: Arc<dyn TestService>,
        config: PollingConfig,
        code: TestCode,
        user_email: impl Into<String>,
    ) -> Self {
        let mut session = TestSession::new(user_email);
        session.test_code = Some(code);
        session.state = LifecycleState::Generated;
        Self::with_session(service, config, session)
    }

    /// A controller for a test whose detection was already started, e.g.
    /// one picked from history. Starts in `Detecting`.
    pub fn resume(
        service: Arc<dyn TestService>,
        config: PollingConfig,
        code: TestCode,
        user_email: impl Into<String>,
    ) -> Self {
        let mut session = TestSession::new(user_email);
        session.test_code = Some(code);
        session.state = LifecycleState::Detecting;
        Self::with_session(service, config, session)
    }

    fn with_session(
        service: Arc<dyn TestService>,
        config: PollingConfig,
        session: TestSession,
    ) -> Self {
        let (session, _) = watch::channel(session);
        Self {
            service,
            config,
            callback: Arc::new(NoOpCallback),
            session,
            cancellation: CancellationToken::new(),
            seq: AtomicU64::new(0),
            failure: Mutex::new(None),
            detect_in_flight: AtomicBool::new(false),
            polling: AtomicBool::new(false),
        }
    }

    pub fn with_callback(mut self, callback: Arc<dyn LifecycleCallback>) -> Self {
        self.callback = callback;
        self
    }

    /// Tie disposal to `parent`: cancelling it disposes this controller.
    pub fn with_parent_token(mut self, parent: &CancellationToken) -> Self {
        self.cancellation = parent.child_token();
        self
    }

    /// Current session contents.
    pub fn snapshot(&self) -> TestSession {
        self.session.borrow().clone()
    }

    /// Watch the session for changes.
    pub fn subscribe(&self) -> watch::Receiver<TestSession> {
        self.session.subscribe()
    }

    pub fn state(&self) -> LifecycleState {
        self.session.borrow().state
    }

    pub fn test_code(&self) -> Option<TestCode> {
        self.session.borrow().test_code.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Abandon the session. In-flight requests are dropped and no later
    /// response touches the session.
    pub fn dispose(&self) {
        if !self.cancellation.is_cancelled() {
            debug!(code = ?self.test_code(), "Disposing test lifecycle");
            self.cancellation.cancel();
        }
    }

    /// Ask the service for a new test code.
    pub async fn generate(&self, user_email: &str) -> Result<TestCode, InboxCheckError> {
        let email = user_email.trim();
        if email.is_empty() {
            return Err(ValidationError::MissingField {
                field: "email".into(),
            }
            .into());
        }
        let from = self.state();
        let seq = self.next_seq();
        if !self.apply(seq, Some(LifecycleState::Generating), |s| {
            s.user_email = email.to_string();
            s.last_error = None;
        }) {
            return Err(self.rejected(from, LifecycleState::Generating));
        }
        self.callback
            .on_state_change(from, LifecycleState::Generating)
            .await;

        match self.cancellable(self.service.create_test(email)).await? {
            Ok(code) => {
                let stored = code.clone();
                if self.apply(seq, Some(LifecycleState::Generated), |s| {
                    s.test_code = Some(stored);
                }) {
                    info!(code = %code, "Test code generated");
                    self.callback
                        .on_state_change(LifecycleState::Generating, LifecycleState::Generated)
                        .await;
                }
                Ok(code)
            }
            Err(e) => {
                warn!(error = %e, "Failed to generate test code");
                if self.apply(seq, Some(LifecycleState::Idle), |s| {
                    s.last_error = Some((&e).into());
                }) {
                    self.callback
                        .on_state_change(LifecycleState::Generating, LifecycleState::Idle)
                        .await;
                }
                Err(e.into())
            }
        }
    }

    /// Start detection for the generated code.
    ///
    /// On a service error the session stays `Generated` and the call may be
    /// retried; a `NotFound` fails the session.
    pub async fn start_detection(&self) -> Result<(), InboxCheckError> {
        match self.state() {
            LifecycleState::Generated => {}
            LifecycleState::Detecting => return Err(LifecycleError::AlreadyDetecting.into()),
            other => return Err(self.rejected(other, LifecycleState::Detecting)),
        }
        let Some(_in_flight) = FlagGuard::acquire(&self.detect_in_flight) else {
            return Err(LifecycleError::AlreadyDetecting.into());
        };
        let code = self.require_code()?;
        let seq = self.next_seq();

        match self.cancellable(self.service.start_detection(&code)).await? {
            Ok(()) => {
                if self.apply(seq, Some(LifecycleState::Detecting), |s| {
                    s.last_error = None;
                }) {
                    info!(code = %code, "Detection started");
                    self.callback
                        .on_state_change(LifecycleState::Generated, LifecycleState::Detecting)
                        .await;
                }
                Ok(())
            }
            Err(e) if e.is_terminal() => {
                self.fail(seq, Failure::Service(e.clone())).await;
                Err(e.into())
            }
            Err(e) => {
                warn!(code = %code, error = %e, "Failed to start detection");
                let descriptor = ErrorDescriptor::from(&e);
                self.apply(seq, None, |s| s.last_error = Some(descriptor));
                Err(e.into())
            }
        }
    }

    /// Start detection, then poll until the session ends.
    pub async fn detect(&self) -> Result<TestSession, InboxCheckError> {
        self.start_detection().await?;
        self.poll_until_terminal().await
    }

    /// Poll detection status until the session is `Completed` or `Failed`.
    ///
    /// Returns the completed session, or the error that failed it.
    pub async fn poll_until_terminal(&self) -> Result<TestSession, InboxCheckError> {
        if let Some(outcome) = self.terminal_outcome() {
            return outcome;
        }
        let state = self.state();
        if state != LifecycleState::Detecting {
            return Err(self.rejected(state, LifecycleState::Detecting));
        }
        let Some(_polling) = FlagGuard::acquire(&self.polling) else {
            return Err(LifecycleError::AlreadyDetecting.into());
        };
        let code = self.require_code()?;
        let started = Instant::now();
        let interval = self.config.interval();
        let mut attempts: u32 = 0;
        let mut consecutive_failures: u32 = 0;

        loop {
            if let Some(outcome) = self.terminal_outcome() {
                return outcome;
            }

            let elapsed = started.elapsed();
            let out_of_attempts = self.config.max_attempts().is_some_and(|max| attempts >= max);
            let out_of_time = self.config.max_wait().is_some_and(|max| elapsed >= max);
            if out_of_attempts || out_of_time {
                warn!(code = %code, attempts, elapsed_secs = elapsed.as_secs(), "Detection timed out");
                let timeout = LifecycleError::Timeout {
                    attempts,
                    elapsed_secs: elapsed.as_secs(),
                };
                self.fail(self.next_seq(), Failure::Lifecycle(timeout)).await;
                continue;
            }

            attempts += 1;
            let seq = self.next_seq();
            debug!(code = %code, attempt = attempts, "Checking detection status");

            let failed = match self.cancellable(self.service.get_status(&code)).await? {
                Ok(report) if report.status.is_completed() => {
                    // The status flag can flip before results are fully
                    // written upstream; confirm with one results fetch.
                    match self.cancellable(self.service.get_results(&code)).await? {
                        Ok(results) => {
                            self.complete(seq, &report, results).await;
                            None
                        }
                        Err(e) => Some(e),
                    }
                }
                Ok(report) if report.status.is_failed() => {
                    let failure = LifecycleError::RemoteFailure {
                        status: report.status.to_string(),
                    };
                    self.fail(seq, Failure::Lifecycle(failure)).await;
                    None
                }
                Ok(report) => {
                    self.record_progress(seq, &report).await;
                    None
                }
                Err(e) => Some(e),
            };

            match failed {
                None => consecutive_failures = 0,
                Some(e) if e.is_terminal() => {
                    warn!(code = %code, error = %e, "Test is unknown to the service");
                    self.fail(seq, Failure::Service(e)).await;
                }
                Some(e) => {
                    consecutive_failures += 1;
                    self.report_transient(seq, &e, consecutive_failures).await;
                    if self
                        .config
                        .max_consecutive_failures()
                        .is_some_and(|max| consecutive_failures >= max)
                    {
                        let exhausted = LifecycleError::RetriesExhausted {
                            attempts: consecutive_failures,
                            last: e,
                        };
                        self.fail(seq, Failure::Lifecycle(exhausted)).await;
                    }
                }
            }

            if self.session.borrow().is_terminal() {
                continue;
            }
            self.cancellable(tokio::time::sleep(interval)).await?;
        }
    }

    /// Fetch status and results at once and fold them into the session.
    ///
    /// May complete a `Detecting` session. Never changes the state of a
    /// session that is not `Detecting`. A failed fetch is returned as an
    /// error but only a `NotFound` while detecting fails the session.
    pub async fn refresh(&self) -> Result<TestSession, InboxCheckError> {
        let code = self.require_code()?;
        let seq = self.next_seq();
        debug!(code = %code, "Refreshing test status and results");
        let (status, results) = self
            .cancellable(async {
                tokio::join!(
                    self.service.get_status(&code),
                    self.service.get_results(&code)
                )
            })
            .await?;

        let detecting = self.state() == LifecycleState::Detecting;
        // A terminal error in either leg outranks a transient one.
        let errors = [status.as_ref().err(), results.as_ref().err()];
        let error = errors
            .iter()
            .flatten()
            .find(|e| e.is_terminal())
            .or_else(|| errors.iter().flatten().next())
            .map(|e| (*e).clone());

        if detecting && let Some(e) = error.as_ref().filter(|e| e.is_terminal()) {
            self.fail(seq, Failure::Service(e.clone())).await;
            return Err(e.clone().into());
        }

        match (status, results) {
            (Ok(report), Ok(results)) if detecting && report.status.is_completed() => {
                self.complete(seq, &report, results).await;
            }
            (Ok(report), _) if detecting && report.status.is_failed() => {
                let failure = LifecycleError::RemoteFailure {
                    status: report.status.to_string(),
                };
                self.fail(seq, Failure::Lifecycle(failure)).await;
            }
            (status, results) => {
                let descriptor = error.as_ref().map(ErrorDescriptor::from);
                let progress = status.as_ref().ok().and_then(|r| r.progress);
                let applied = self.apply(seq, None, |s| {
                    if let Ok(report) = &status {
                        s.progress = report.progress.or(s.progress);
                        s.remote_status = Some(report.status.clone());
                    }
                    if let Ok(results) = results {
                        s.results = results.results;
                    }
                    s.last_error = descriptor;
                });
                if applied
                    && let (Some(progress), Ok(report)) = (progress, &status)
                {
                    self.callback.on_progress(&progress, &report.status).await;
                }
            }
        }

        match error {
            Some(e) => {
                if !self.is_disposed() {
                    self.callback.on_transient_error(&e, 1).await;
                }
                Err(e.into())
            }
            None => Ok(self.snapshot()),
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn require_code(&self) -> Result<TestCode, LifecycleError> {
        self.test_code().ok_or(LifecycleError::NoTestCode)
    }

    fn rejected(&self, from: LifecycleState, to: LifecycleState) -> InboxCheckError {
        if self.is_disposed() {
            LifecycleError::Cancelled.into()
        } else {
            LifecycleError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            }
            .into()
        }
    }

    /// Race `fut` against disposal.
    async fn cancellable<F: Future>(&self, fut: F) -> Result<F::Output, LifecycleError> {
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(LifecycleError::Cancelled),
            out = fut => Ok(out),
        }
    }

    /// Apply a write from the fetch numbered `seq`.
    ///
    /// With a `target`, the write is a transition and applies only along an
    /// allowed edge. Without one it is a data update and applies only if no
    /// newer fetch has been applied. Returns whether the session changed.
    fn apply(
        &self,
        seq: u64,
        target: Option<LifecycleState>,
        update: impl FnOnce(&mut TestSession),
    ) -> bool {
        if self.cancellation.is_cancelled() {
            return false;
        }
        self.session.send_if_modified(|s| {
            if s.state.is_terminal() {
                return false;
            }
            match target {
                Some(next) if !s.state.can_transition_to(next) => return false,
                Some(next) => s.state = next,
                None if seq < s.applied_seq => return false,
                None => {}
            }
            s.applied_seq = s.applied_seq.max(seq);
            update(s);
            s.updated_at = Utc::now();
            true
        })
    }

    /// `Some` once polling should stop.
    fn terminal_outcome(&self) -> Option<Result<TestSession, InboxCheckError>> {
        if self.is_disposed() {
            return Some(Err(LifecycleError::Cancelled.into()));
        }
        let snapshot = self.snapshot();
        match snapshot.state {
            LifecycleState::Completed => Some(Ok(snapshot)),
            LifecycleState::Failed => {
                let failure = self.failure.lock().unwrap().clone();
                Some(Err(failure.map(Into::into).unwrap_or_else(|| {
                    LifecycleError::RemoteFailure {
                        status: "failed".into(),
                    }
                    .into()
                })))
            }
            _ => None,
        }
    }

    async fn complete(&self, seq: u64, report: &StatusReport, results: TestResults) {
        let score = results.score();
        let status = report.status.clone();
        let progress = report.progress;
        if self.apply(seq, Some(LifecycleState::Completed), |s| {
            s.deliverability_score = Some(score);
            s.results = results.results;
            s.progress = progress.or(s.progress);
            s.remote_status = Some(status);
            s.last_error = None;
        }) {
            let snapshot = self.snapshot();
            info!(code = ?snapshot.test_code, score, "Detection completed");
            self.callback
                .on_state_change(LifecycleState::Detecting, LifecycleState::Completed)
                .await;
            self.callback.on_completed(&snapshot).await;
        }
    }

    async fn fail(&self, seq: u64, failure: Failure) {
        let from = self.state();
        let descriptor = failure.descriptor();
        if self.apply(seq, Some(LifecycleState::Failed), |s| {
            s.last_error = Some(descriptor);
        }) {
            *self.failure.lock().unwrap() = Some(failure);
            let snapshot = self.snapshot();
            warn!(code = ?snapshot.test_code, error = ?snapshot.last_error, "Test failed");
            self.callback
                .on_state_change(from, LifecycleState::Failed)
                .await;
            self.callback.on_failed(&snapshot).await;
        }
    }

    async fn record_progress(&self, seq: u64, report: &StatusReport) {
        let progress = report.progress;
        let status = report.status.clone();
        let applied = self.apply(seq, None, |s| {
            s.progress = progress.or(s.progress);
            s.remote_status = Some(status);
            s.last_error = None;
        });
        if applied && let Some(progress) = &progress {
            debug!(progress = %progress, status = %report.status, "Detection in progress");
            self.callback.on_progress(progress, &report.status).await;
        }
    }

    async fn report_transient(&self, seq: u64, error: &ServiceError, consecutive: u32) {
        warn!(
            error = %error,
            consecutive,
            retryable = error.is_transient(),
            "Status check failed; will retry"
        );
        let descriptor = ErrorDescriptor::from(error);
        self.apply(seq, None, |s| s.last_error = Some(descriptor));
        if !self.is_disposed() {
            self.callback.on_transient_error(error, consecutive).await;
        }
    }
}

impl Drop for TestLifecycle {
    fn drop(&mut self) {
        self.cancellation.cancel();
    }
}
