//! # Inboxcheck Core
//!
//! Core library for the inboxcheck email deliverability tester.
//! Provides the remote test service client, the test lifecycle controller,
//! scoring, persisted preferences, configuration, and fundamental types.

pub mod client;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod persistence;
pub mod prefs;
pub mod score;
pub mod types;

// Re-export commonly used types at the crate root.
pub use client::{HttpTestService, MockTestService, TestService};
pub use config::{InboxCheckConfig, PollingConfig, ServiceConfig, TestInbox};
pub use error::{
    ErrorDescriptor, ErrorKind, InboxCheckError, LifecycleError, Result, ServiceError,
    ValidationError,
};
pub use lifecycle::{
    LifecycleCallback, LifecycleEvent, NoOpCallback, RecordingCallback, TestLifecycle,
};
pub use prefs::{Preferences, PreferencesStore};
pub use score::{PlacementTally, ScoreBand, fallback_score, resolve_score};
pub use types::{
    DetectionStatus, Folder, HealthStatus, LifecycleState, PlacementResult, Progress, Report,
    ReportSummary, Statistics, StatusReport, TestCode, TestHistory, TestResults, TestSession,
    TestSummary,
};
