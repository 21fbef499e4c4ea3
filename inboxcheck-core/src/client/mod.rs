//! Remote test service client.
//!
//! [`TestService`] is the seam between the lifecycle controller and the
//! backend that creates tests, scans the test inboxes, and builds reports.
//! [`HttpTestService`] talks to the real HTTP API; [`MockTestService`]
//! replays scripted responses for tests.

pub mod http;
pub mod mock;

pub use http::HttpTestService;
pub use mock::MockTestService;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::ServiceError;
use crate::types::{
    HealthStatus, Report, ReportSummary, Statistics, StatusReport, TestCode, TestHistory,
    TestResults,
};

/// Operations offered by the remote test service.
///
/// Implementations hold no session state, cache nothing, and never retry;
/// retry and backoff policy belongs to the caller.
#[async_trait]
pub trait TestService: Send + Sync {
    /// Check that the service is reachable.
    async fn check_health(&self) -> Result<HealthStatus, ServiceError>;

    /// Create a test for `user_email` and return its code.
    async fn create_test(&self, user_email: &str) -> Result<TestCode, ServiceError>;

    /// Ask the service to scan the test inboxes for `code`.
    ///
    /// Must not be called again while detection for `code` is running.
    async fn start_detection(&self, code: &TestCode) -> Result<(), ServiceError>;

    /// Current detection status. Never mutates remote state.
    async fn get_status(&self, code: &TestCode) -> Result<StatusReport, ServiceError>;

    /// Placement results and the authoritative score, when known.
    async fn get_results(&self, code: &TestCode) -> Result<TestResults, ServiceError>;

    async fn get_report(&self, code: &TestCode) -> Result<Report, ServiceError>;

    async fn get_report_summary(&self, code: &TestCode) -> Result<ReportSummary, ServiceError>;

    /// The report rendered as a PDF document.
    async fn get_report_pdf(&self, code: &TestCode) -> Result<Bytes, ServiceError>;

    /// Email the report for `code` to `email`.
    async fn send_report_email(&self, code: &TestCode, email: &str) -> Result<(), ServiceError>;

    async fn get_history(&self, user_email: &str) -> Result<TestHistory, ServiceError>;

    async fn get_statistics(&self, user_email: &str) -> Result<Statistics, ServiceError>;
}
