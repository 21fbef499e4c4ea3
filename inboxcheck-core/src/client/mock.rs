//! Scripted in-memory [`TestService`] for tests and offline runs.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use super::TestService;
use crate::error::ServiceError;
use crate::types::{
    DetectionStatus, HealthStatus, Progress, Report, ReportSummary, Statistics, StatusReport,
    TestCode, TestHistory, TestResults,
};

/// Queue of responses for one operation. The last queued response is
/// repeated once the queue runs dry, if `sticky` is set.
struct Script<T> {
    queue: VecDeque<Result<T, ServiceError>>,
    sticky: Option<Result<T, ServiceError>>,
}

impl<T: Clone> Script<T> {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            sticky: None,
        }
    }

    fn next(&mut self, op: &str) -> Result<T, ServiceError> {
        if let Some(next) = self.queue.pop_front() {
            return next;
        }
        self.sticky.clone().unwrap_or_else(|| {
            Err(ServiceError::parse(format!("no scripted response for {}", op)))
        })
    }
}

#[derive(Default)]
struct Detection {
    /// Codes whose detection was started and has not been seen to finish.
    running: HashSet<TestCode>,
    /// Codes for which detection was ever started.
    started: HashSet<TestCode>,
    violations: usize,
}

/// A [`TestService`] that replays queued responses.
///
/// `get_status` for a code whose detection has not been started answers
/// `pending` without consuming the script, matching the service contract
/// that a fresh test never reports `completed`.
pub struct MockTestService {
    health: Mutex<Script<HealthStatus>>,
    create: Mutex<Script<TestCode>>,
    detect: Mutex<Script<()>>,
    status: Mutex<Script<StatusReport>>,
    results: Mutex<Script<TestResults>>,
    report: Mutex<Script<Report>>,
    summary: Mutex<Script<ReportSummary>>,
    pdf: Mutex<Script<Bytes>>,
    send_report: Mutex<Script<()>>,
    history: Mutex<Script<TestHistory>>,
    statistics: Mutex<Script<Statistics>>,
    detection: Mutex<Detection>,
    calls: Mutex<HashMap<&'static str, usize>>,
    status_delay: Mutex<Duration>,
    results_delay: Mutex<Duration>,
}

impl Default for MockTestService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTestService {
    pub fn new() -> Self {
        let mut detect = Script::new();
        detect.sticky = Some(Ok(()));
        let mut send_report = Script::new();
        send_report.sticky = Some(Ok(()));
        let mut health = Script::new();
        health.sticky = Some(Ok(HealthStatus {
            status: "ok".into(),
            details: serde_json::Value::Null,
        }));
        Self {
            health: Mutex::new(health),
            create: Mutex::new(Script::new()),
            detect: Mutex::new(detect),
            status: Mutex::new(Script::new()),
            results: Mutex::new(Script::new()),
            report: Mutex::new(Script::new()),
            summary: Mutex::new(Script::new()),
            pdf: Mutex::new(Script::new()),
            send_report: Mutex::new(send_report),
            history: Mutex::new(Script::new()),
            statistics: Mutex::new(Script::new()),
            detection: Mutex::new(Detection::default()),
            calls: Mutex::new(HashMap::new()),
            status_delay: Mutex::new(Duration::ZERO),
            results_delay: Mutex::new(Duration::ZERO),
        }
    }

    /// A status report with only the status set.
    pub fn status(status: DetectionStatus) -> StatusReport {
        StatusReport {
            status,
            progress: None,
            deliverability_score: None,
        }
    }

    /// A `pending` status report with progress.
    pub fn pending(completed: u32, total: u32) -> StatusReport {
        StatusReport {
            status: DetectionStatus::Pending,
            progress: Some(Progress { completed, total }),
            deliverability_score: None,
        }
    }

    /// A `completed` status report with the given score.
    pub fn completed(score: u8) -> StatusReport {
        StatusReport {
            status: DetectionStatus::Completed,
            progress: None,
            deliverability_score: Some(score),
        }
    }

    pub fn transport_error(message: &str) -> ServiceError {
        ServiceError::Transport {
            message: message.to_string(),
        }
    }

    pub fn queue_create(&self, response: Result<TestCode, ServiceError>) {
        self.create.lock().unwrap().queue.push_back(response);
    }

    pub fn queue_detect(&self, response: Result<(), ServiceError>) {
        self.detect.lock().unwrap().queue.push_back(response);
    }

    pub fn queue_status(&self, response: Result<StatusReport, ServiceError>) {
        self.status.lock().unwrap().queue.push_back(response);
    }

    /// Answer every status check with `response` once the queue is empty.
    pub fn set_default_status(&self, response: Result<StatusReport, ServiceError>) {
        self.status.lock().unwrap().sticky = Some(response);
    }

    pub fn queue_results(&self, response: Result<TestResults, ServiceError>) {
        self.results.lock().unwrap().queue.push_back(response);
    }

    pub fn set_default_results(&self, response: Result<TestResults, ServiceError>) {
        self.results.lock().unwrap().sticky = Some(response);
    }

    pub fn queue_health(&self, response: Result<HealthStatus, ServiceError>) {
        self.health.lock().unwrap().queue.push_back(response);
    }

    pub fn queue_report(&self, response: Result<Report, ServiceError>) {
        self.report.lock().unwrap().queue.push_back(response);
    }

    pub fn queue_report_summary(&self, response: Result<ReportSummary, ServiceError>) {
        self.summary.lock().unwrap().queue.push_back(response);
    }

    pub fn queue_report_pdf(&self, response: Result<Bytes, ServiceError>) {
        self.pdf.lock().unwrap().queue.push_back(response);
    }

    pub fn queue_send_report(&self, response: Result<(), ServiceError>) {
        self.send_report.lock().unwrap().queue.push_back(response);
    }

    pub fn queue_history(&self, response: Result<TestHistory, ServiceError>) {
        self.history.lock().unwrap().queue.push_back(response);
    }

    pub fn queue_statistics(&self, response: Result<Statistics, ServiceError>) {
        self.statistics.lock().unwrap().queue.push_back(response);
    }

    /// Treat detection for `code` as already started (e.g. by another client).
    pub fn mark_detection_started(&self, code: &TestCode) {
        let mut detection = self.detection.lock().unwrap();
        detection.started.insert(code.clone());
        detection.running.insert(code.clone());
    }

    /// Delay applied to every status check before it answers.
    pub fn set_status_delay(&self, delay: Duration) {
        *self.status_delay.lock().unwrap() = delay;
    }

    /// Delay applied to every results fetch before it answers.
    pub fn set_results_delay(&self, delay: Duration) {
        *self.results_delay.lock().unwrap() = delay;
    }

    /// Number of calls made to operation `op` (e.g. `"get_status"`).
    pub fn calls(&self, op: &str) -> usize {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    /// `start_detection` calls made while detection was already running.
    pub fn detect_violations(&self) -> usize {
        self.detection.lock().unwrap().violations
    }

    fn record(&self, op: &'static str) {
        *self.calls.lock().unwrap().entry(op).or_insert(0) += 1;
    }
}

#[async_trait]
impl TestService for MockTestService {
    async fn check_health(&self) -> Result<HealthStatus, ServiceError> {
        self.record("check_health");
        self.health.lock().unwrap().next("check_health")
    }

    async fn create_test(&self, _user_email: &str) -> Result<TestCode, ServiceError> {
        self.record("create_test");
        self.create.lock().unwrap().next("create_test")
    }

    async fn start_detection(&self, code: &TestCode) -> Result<(), ServiceError> {
        self.record("start_detection");
        let response = self.detect.lock().unwrap().next("start_detection");
        let mut detection = self.detection.lock().unwrap();
        if detection.running.contains(code) {
            detection.violations += 1;
        }
        if response.is_ok() {
            detection.started.insert(code.clone());
            detection.running.insert(code.clone());
        }
        response
    }

    async fn get_status(&self, code: &TestCode) -> Result<StatusReport, ServiceError> {
        self.record("get_status");
        let delay = *self.status_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if !self.detection.lock().unwrap().started.contains(code) {
            return Ok(Self::status(DetectionStatus::Pending));
        }
        let response = self.status.lock().unwrap().next("get_status");
        if let Ok(report) = &response
            && (report.status.is_completed() || report.status.is_failed())
        {
            self.detection.lock().unwrap().running.remove(code);
        }
        response
    }

    async fn get_results(&self, _code: &TestCode) -> Result<TestResults, ServiceError> {
        self.record("get_results");
        let delay = *self.results_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.results.lock().unwrap().next("get_results")
    }

    async fn get_report(&self, _code: &TestCode) -> Result<Report, ServiceError> {
        self.record("get_report");
        self.report.lock().unwrap().next("get_report")
    }

    async fn get_report_summary(&self, _code: &TestCode) -> Result<ReportSummary, ServiceError> {
        self.record("get_report_summary");
        self.summary.lock().unwrap().next("get_report_summary")
    }

    async fn get_report_pdf(&self, _code: &TestCode) -> Result<Bytes, ServiceError> {
        self.record("get_report_pdf");
        self.pdf.lock().unwrap().next("get_report_pdf")
    }

    async fn send_report_email(&self, _code: &TestCode, _email: &str) -> Result<(), ServiceError> {
        self.record("send_report_email");
        self.send_report.lock().unwrap().next("send_report_email")
    }

    async fn get_history(&self, _user_email: &str) -> Result<TestHistory, ServiceError> {
        self.record("get_history");
        self.history.lock().unwrap().next("get_history")
    }

    async fn get_statistics(&self, _user_email: &str) -> Result<Statistics, ServiceError> {
        self.record("get_statistics");
        self.statistics.lock().unwrap().next("get_statistics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code() -> TestCode {
        TestCode::parse("ABC123").unwrap()
    }

    #[tokio::test]
    async fn test_status_before_detection_is_pending() {
        let mock = MockTestService::new();
        mock.queue_status(Ok(MockTestService::completed(90)));
        let status = mock.get_status(&code()).await.unwrap();
        assert_eq!(status.status, DetectionStatus::Pending);
        // The scripted response was not consumed.
        mock.start_detection(&code()).await.unwrap();
        assert!(mock.get_status(&code()).await.unwrap().status.is_completed());
    }

    #[tokio::test]
    async fn test_unscripted_call_is_parse_error() {
        let mock = MockTestService::new();
        let err = mock.create_test("a@b.com").await.unwrap_err();
        assert!(matches!(err, ServiceError::Parse { .. }));
        assert_eq!(mock.calls("create_test"), 1);
    }

    #[tokio::test]
    async fn test_sticky_default_status() {
        let mock = MockTestService::new();
        mock.mark_detection_started(&code());
        mock.set_default_status(Ok(MockTestService::pending(0, 2)));
        for _ in 0..3 {
            let status = mock.get_status(&code()).await.unwrap();
            assert_eq!(status.progress.unwrap().total, 2);
        }
        assert_eq!(mock.calls("get_status"), 3);
    }

    #[tokio::test]
    async fn test_detect_while_running_is_counted() {
        let mock = MockTestService::new();
        mock.start_detection(&code()).await.unwrap();
        mock.start_detection(&code()).await.unwrap();
        assert_eq!(mock.detect_violations(), 1);
    }
}
