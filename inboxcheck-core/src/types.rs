//! Core data model: test codes, lifecycle states, placement results, and
//! the typed payloads returned by the remote test service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorDescriptor, ValidationError};
use crate::score;

/// Opaque identifier the service assigns to one deliverability test.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestCode(String);

impl TestCode {
    /// Parse a test code supplied by a user (command line, history link).
    ///
    /// The code is spliced into URL paths, so path and query delimiters
    /// and whitespace are rejected.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let code = input.trim();
        if code.is_empty() {
            return Err(ValidationError::MissingField {
                field: "test code".into(),
            });
        }
        if let Some(bad) = code
            .chars()
            .find(|c| c.is_whitespace() || matches!(c, '/' | '?' | '#'))
        {
            return Err(ValidationError::InvalidTestCode {
                code: code.to_string(),
                reason: format!("contains '{}'", bad.escape_default()),
            });
        }
        Ok(Self(code.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TestCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TestCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Where a test session is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Idle,
    Generating,
    Generated,
    Detecting,
    Completed,
    Failed,
}

impl LifecycleState {
    /// `Completed` and `Failed` end the session; nothing moves out of them.
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Completed | LifecycleState::Failed)
    }

    /// Position in the forward progression. Terminal states share a rank.
    pub fn rank(self) -> u8 {
        match self {
            LifecycleState::Idle => 0,
            LifecycleState::Generating => 1,
            LifecycleState::Generated => 2,
            LifecycleState::Detecting => 3,
            LifecycleState::Completed | LifecycleState::Failed => 4,
        }
    }

    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Idle, Generating)
                | (Generating, Generated)
                | (Generating, Idle)
                | (Generated, Detecting)
                | (Generated, Failed)
                | (Detecting, Completed)
                | (Detecting, Failed)
        )
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Idle => write!(f, "idle"),
            LifecycleState::Generating => write!(f, "generating"),
            LifecycleState::Generated => write!(f, "generated"),
            LifecycleState::Detecting => write!(f, "detecting"),
            LifecycleState::Completed => write!(f, "completed"),
            LifecycleState::Failed => write!(f, "failed"),
        }
    }
}

/// Detection progress as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Progress {
    #[serde(default)]
    pub completed: u32,
    #[serde(default)]
    pub total: u32,
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.completed, self.total)
    }
}

/// Where a test email was found in a test inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Folder {
    Inbox,
    Spam,
    Promotions,
    NotReceived,
}

impl Folder {
    pub const ALL: [Folder; 4] = [
        Folder::Inbox,
        Folder::Spam,
        Folder::Promotions,
        Folder::NotReceived,
    ];

    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            Folder::Inbox => "Inbox",
            Folder::Spam => "Spam",
            Folder::Promotions => "Promotions",
            Folder::NotReceived => "Not Received",
        }
    }

    /// Display tone: `success`, `error`, `warning`, or `neutral`.
    pub fn tone(self) -> &'static str {
        match self {
            Folder::Inbox => "success",
            Folder::Spam => "error",
            Folder::Promotions => "warning",
            Folder::NotReceived => "neutral",
        }
    }
}

impl std::fmt::Display for Folder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Status of the remote detection job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DetectionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    /// A status string this client does not know; treated as still running.
    Unknown(String),
}

impl DetectionStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, DetectionStatus::Completed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, DetectionStatus::Failed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            DetectionStatus::Pending => "pending",
            DetectionStatus::InProgress => "in_progress",
            DetectionStatus::Completed => "completed",
            DetectionStatus::Failed => "failed",
            DetectionStatus::Unknown(s) => s,
        }
    }
}

impl From<String> for DetectionStatus {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" | "created" | "waiting" => DetectionStatus::Pending,
            "in_progress" | "processing" | "detecting" | "running" => DetectionStatus::InProgress,
            "completed" | "complete" | "done" => DetectionStatus::Completed,
            "failed" | "error" => DetectionStatus::Failed,
            _ => DetectionStatus::Unknown(value),
        }
    }
}

impl From<DetectionStatus> for String {
    fn from(value: DetectionStatus) -> Self {
        match value {
            DetectionStatus::Unknown(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for DetectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response of the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: DetectionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    /// Intermediate score; never surfaced as final.
    #[serde(
        default,
        deserialize_with = "score::deserialize_opt_score",
        skip_serializing_if = "Option::is_none"
    )]
    pub deliverability_score: Option<u8>,
}

/// Placement of the test email in one test inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementResult {
    pub email: String,
    pub folder: Folder,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inbox_name: Option<String>,
}

/// Response of the results endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResults {
    #[serde(
        default,
        deserialize_with = "score::deserialize_opt_score",
        skip_serializing_if = "Option::is_none"
    )]
    pub deliverability_score: Option<u8>,
    pub results: Vec<PlacementResult>,
}

impl TestResults {
    /// Authoritative score when present, otherwise the inbox-share fallback.
    pub fn score(&self) -> u8 {
        score::resolve_score(self.deliverability_score, &self.results)
    }
}

/// One past test, as listed by the history endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSummary {
    pub test_code: TestCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    pub status: DetectionStatus,
    #[serde(
        default,
        deserialize_with = "score::deserialize_opt_score",
        skip_serializing_if = "Option::is_none"
    )]
    pub deliverability_score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub results: Vec<PlacementResult>,
}

impl TestSummary {
    pub fn score(&self) -> u8 {
        score::resolve_score(self.deliverability_score, &self.results)
    }
}

/// Response of the history endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestHistory {
    pub tests: Vec<TestSummary>,
}

/// Aggregate statistics for one user.
///
/// The service spells these fields in camelCase, snake_case, or both at
/// once. Every spelling is accepted and the camelCase value
/// wins unless it is zero.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawStatistics")]
pub struct Statistics {
    pub total_tests: u32,
    pub average_score: f64,
    pub total_emails: u32,
    pub total_inbox: u32,
    pub total_spam: u32,
    pub total_promotions: u32,
    pub total_not_received: u32,
    pub trend: String,
    pub recent_tests: Vec<TestSummary>,
}

#[derive(Deserialize)]
struct RawStatistics {
    #[serde(rename = "totalTests")]
    total_tests: Option<u32>,
    #[serde(rename = "total_tests")]
    total_tests_snake: Option<u32>,
    #[serde(rename = "averageScore")]
    average_score: Option<f64>,
    #[serde(rename = "average_score")]
    average_score_snake: Option<f64>,
    #[serde(rename = "totalEmails")]
    total_emails: Option<u32>,
    #[serde(rename = "total_emails")]
    total_emails_snake: Option<u32>,
    #[serde(rename = "totalInbox")]
    total_inbox: Option<u32>,
    #[serde(rename = "total_inbox")]
    total_inbox_snake: Option<u32>,
    #[serde(rename = "totalSpam")]
    total_spam: Option<u32>,
    #[serde(rename = "total_spam")]
    total_spam_snake: Option<u32>,
    #[serde(rename = "totalPromotions")]
    total_promotions: Option<u32>,
    #[serde(rename = "total_promotions")]
    total_promotions_snake: Option<u32>,
    #[serde(rename = "totalNotReceived")]
    total_not_received: Option<u32>,
    #[serde(rename = "total_not_received")]
    total_not_received_snake: Option<u32>,
    trend: Option<String>,
    #[serde(rename = "recentTests")]
    recent_tests: Option<Vec<TestSummary>>,
    #[serde(rename = "recent_tests")]
    recent_tests_snake: Option<Vec<TestSummary>>,
}

/// camelCase value unless it is missing or zero, then the snake_case one.
fn either<T: Default + PartialEq>(camel: Option<T>, snake: Option<T>) -> T {
    match camel {
        Some(value) if value != T::default() => value,
        camel => snake.or(camel).unwrap_or_default(),
    }
}

impl From<RawStatistics> for Statistics {
    fn from(raw: RawStatistics) -> Self {
        Self {
            total_tests: either(raw.total_tests, raw.total_tests_snake),
            average_score: either(raw.average_score, raw.average_score_snake),
            total_emails: either(raw.total_emails, raw.total_emails_snake),
            total_inbox: either(raw.total_inbox, raw.total_inbox_snake),
            total_spam: either(raw.total_spam, raw.total_spam_snake),
            total_promotions: either(raw.total_promotions, raw.total_promotions_snake),
            total_not_received: either(raw.total_not_received, raw.total_not_received_snake),
            trend: raw.trend.unwrap_or_else(default_trend),
            recent_tests: either(raw.recent_tests, raw.recent_tests_snake),
        }
    }
}

fn default_trend() -> String {
    "neutral".to_string()
}

impl Statistics {
    /// Count for one folder.
    pub fn folder_total(&self, folder: Folder) -> u32 {
        match folder {
            Folder::Inbox => self.total_inbox,
            Folder::Spam => self.total_spam,
            Folder::Promotions => self.total_promotions,
            Folder::NotReceived => self.total_not_received,
        }
    }
}

/// Counts by folder within a report.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    #[serde(default)]
    pub total_inboxes: u32,
    #[serde(default)]
    pub inbox_count: u32,
    #[serde(default)]
    pub spam_count: u32,
    #[serde(default)]
    pub promotions_count: u32,
    #[serde(default)]
    pub not_received_count: u32,
    #[serde(default)]
    pub inbox_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
}

impl Recommendation {
    pub fn is_success(&self) -> bool {
        self.kind == "success"
    }
}

/// Full report for a finished test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub test_code: TestCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(deserialize_with = "score::deserialize_score")]
    pub deliverability_score: u8,
    pub overall_status: String,
    pub summary: ReportSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
    #[serde(default)]
    pub results: Vec<PlacementResult>,
}

/// Service health as reported by `/health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// The client-visible aggregate for one deliverability test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSession {
    pub test_code: Option<TestCode>,
    pub user_email: String,
    pub state: LifecycleState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    /// Only set once `state` is `Completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deliverability_score: Option<u8>,
    #[serde(default)]
    pub results: Vec<PlacementResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_status: Option<DetectionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorDescriptor>,
    pub updated_at: DateTime<Utc>,
    /// Sequence number of the newest fetch whose response was applied.
    #[serde(skip)]
    pub(crate) applied_seq: u64,
}

impl TestSession {
    pub fn new(user_email: impl Into<String>) -> Self {
        Self {
            test_code: None,
            user_email: user_email.into(),
            state: LifecycleState::Idle,
            progress: None,
            deliverability_score: None,
            results: Vec::new(),
            remote_status: None,
            last_error: None,
            updated_at: Utc::now(),
            applied_seq: 0,
        }
    }

    /// The final score, if the session completed.
    pub fn final_score(&self) -> Option<u8> {
        if self.state == LifecycleState::Completed {
            self.deliverability_score
        } else {
            None
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_test_code_parse_trims() {
        let code = TestCode::parse("  ABC123 ").unwrap();
        assert_eq!(code.as_str(), "ABC123");
        assert_eq!(code.to_string(), "ABC123");
    }

    #[test]
    fn test_test_code_parse_rejects_empty_and_delimiters() {
        assert!(matches!(
            TestCode::parse("   "),
            Err(ValidationError::MissingField { .. })
        ));
        assert!(matches!(
            TestCode::parse("ABC/123"),
            Err(ValidationError::InvalidTestCode { .. })
        ));
        assert!(matches!(
            TestCode::parse("AB C"),
            Err(ValidationError::InvalidTestCode { .. })
        ));
    }

    #[test]
    fn test_lifecycle_transitions() {
        use LifecycleState::*;
        assert!(Idle.can_transition_to(Generating));
        assert!(Generating.can_transition_to(Idle));
        assert!(Generating.can_transition_to(Generated));
        assert!(Generated.can_transition_to(Detecting));
        assert!(Detecting.can_transition_to(Completed));
        assert!(Detecting.can_transition_to(Failed));

        assert!(!Generated.can_transition_to(Idle));
        assert!(!Detecting.can_transition_to(Generated));
        assert!(!Completed.can_transition_to(Detecting));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Failed));
    }

    #[test]
    fn test_lifecycle_rank_is_monotonic_along_edges() {
        use LifecycleState::*;
        let all = [Idle, Generating, Generated, Detecting, Completed, Failed];
        for from in all {
            for to in all {
                if from.can_transition_to(to) && !(from == Generating && to == Idle) {
                    assert!(to.rank() > from.rank(), "{from} -> {to}");
                }
            }
        }
    }

    #[test]
    fn test_folder_serde_and_labels() {
        let folder: Folder = serde_json::from_str("\"not_received\"").unwrap();
        assert_eq!(folder, Folder::NotReceived);
        assert_eq!(folder.label(), "Not Received");
        assert_eq!(Folder::Spam.tone(), "error");
        assert!(serde_json::from_str::<Folder>("\"social\"").is_err());
    }

    #[test]
    fn test_detection_status_aliases() {
        let s: DetectionStatus = serde_json::from_str("\"processing\"").unwrap();
        assert_eq!(s, DetectionStatus::InProgress);
        let s: DetectionStatus = serde_json::from_str("\"COMPLETED\"").unwrap();
        assert!(s.is_completed());
        let s: DetectionStatus = serde_json::from_str("\"queued\"").unwrap();
        assert_eq!(s, DetectionStatus::Unknown("queued".into()));
        assert_eq!(serde_json::to_string(&s).unwrap(), "\"queued\"");
    }

    #[test]
    fn test_status_report_parse() {
        let report: StatusReport = serde_json::from_value(serde_json::json!({
            "status": "pending",
            "progress": {"completed": 1, "total": 2}
        }))
        .unwrap();
        assert_eq!(report.status, DetectionStatus::Pending);
        assert_eq!(
            report.progress,
            Some(Progress {
                completed: 1,
                total: 2
            })
        );
        assert_eq!(report.deliverability_score, None);
    }

    #[test]
    fn test_results_missing_results_list_is_error() {
        let parsed = serde_json::from_value::<TestResults>(serde_json::json!({
            "deliverabilityScore": 50
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_statistics_accepts_both_spellings() {
        let camel: Statistics = serde_json::from_value(serde_json::json!({
            "totalTests": 4,
            "averageScore": 62.5,
            "totalInbox": 5,
            "totalEmails": 8,
            "trend": "improving"
        }))
        .unwrap();
        let snake: Statistics = serde_json::from_value(serde_json::json!({
            "total_tests": 4,
            "average_score": 62.5,
            "total_inbox": 5,
            "total_emails": 8,
            "trend": "improving"
        }))
        .unwrap();
        assert_eq!(camel, snake);
        assert_eq!(camel.folder_total(Folder::Inbox), 5);
        assert_eq!(camel.folder_total(Folder::Spam), 0);
    }

    #[test]
    fn test_statistics_with_both_spellings_present() {
        let stats: Statistics = serde_json::from_value(serde_json::json!({
            "totalTests": 4,
            "total_tests": 4,
            "averageScore": 0,
            "average_score": 62.5,
            "totalSpam": 2,
            "total_spam": 3,
            "recent_tests": [{ "testCode": "ABC123", "status": "completed" }]
        }))
        .unwrap();
        assert_eq!(stats.total_tests, 4);
        assert_eq!(stats.average_score, 62.5);
        assert_eq!(stats.folder_total(Folder::Spam), 2);
        assert_eq!(stats.recent_tests.len(), 1);
    }

    #[test]
    fn test_statistics_round_trips_through_json() {
        let stats: Statistics = serde_json::from_value(serde_json::json!({
            "total_tests": 3,
            "total_not_received": 1,
            "trend": "declining"
        }))
        .unwrap();
        let again: Statistics =
            serde_json::from_value(serde_json::to_value(&stats).unwrap()).unwrap();
        assert_eq!(again, stats);
    }

    #[test]
    fn test_statistics_defaults_trend() {
        let stats: Statistics = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(stats.trend, "neutral");
        assert_eq!(stats.total_tests, 0);
    }

    #[test]
    fn test_report_parse() {
        let report: Report = serde_json::from_value(serde_json::json!({
            "testCode": "ABC123",
            "userEmail": "a@b.com",
            "deliverabilityScore": 50,
            "overallStatus": "fair",
            "summary": {
                "totalInboxes": 2,
                "inboxCount": 1,
                "spamCount": 1,
                "promotionsCount": 0,
                "inboxPercentage": 50
            },
            "recommendations": [
                {"type": "warning", "title": "SPF", "message": "Add an SPF record"}
            ],
            "results": [
                {"inboxId": 1, "inboxName": "Gmail 1", "email": "x@gmail.com", "folder": "spam"}
            ]
        }))
        .unwrap();
        assert_eq!(report.test_code.as_str(), "ABC123");
        assert_eq!(report.summary.spam_count, 1);
        assert!(!report.recommendations[0].is_success());
        assert_eq!(report.results[0].inbox_name.as_deref(), Some("Gmail 1"));
    }

    #[test]
    fn test_session_final_score_only_when_completed() {
        let mut session = TestSession::new("a@b.com");
        session.state = LifecycleState::Detecting;
        session.deliverability_score = Some(75);
        assert_eq!(session.final_score(), None);
        session.state = LifecycleState::Completed;
        assert_eq!(session.final_score(), Some(75));
    }
}
