//! Terminal rendering for test sessions, reports, history, and statistics.

use async_trait::async_trait;
use inboxcheck_core::config::compose_subject;
use inboxcheck_core::{
    DetectionStatus, Folder, LifecycleCallback, LifecycleState, PlacementResult,
    PlacementTally, Progress, Report, ScoreBand, ServiceError, Statistics, TestCode,
    TestHistory, TestInbox, TestSession,
};
use std::fmt::Write;
use std::io::IsTerminal;

/// ANSI escape codes for terminal formatting.
mod ansi {
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const RED: &str = "\x1b[31m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const CYAN: &str = "\x1b[36m";
    pub const RESET: &str = "\x1b[0m";
}

fn paint(code: &str, text: &str) -> String {
    if std::io::stdout().is_terminal() {
        format!("{}{}{}", code, text, ansi::RESET)
    } else {
        text.to_string()
    }
}

fn tone_color(tone: &str) -> &'static str {
    match tone {
        "success" => ansi::GREEN,
        "error" => ansi::RED,
        "warning" => ansi::YELLOW,
        _ => ansi::DIM,
    }
}

fn band_color(band: ScoreBand) -> &'static str {
    match band {
        ScoreBand::Good => ansi::GREEN,
        ScoreBand::Fair => ansi::YELLOW,
        ScoreBand::Poor => ansi::RED,
    }
}

pub fn score_line(score: u8) -> String {
    let band = ScoreBand::of(score);
    format!(
        "Deliverability score: {} ({})",
        paint(band_color(band), &format!("{}/100", score)),
        band
    )
}

/// Where to send the test email, with `mailto:` links.
pub fn format_instructions(code: &TestCode, inboxes: &[TestInbox]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Test code: {}", paint(ansi::BOLD, code.as_str()));
    let _ = writeln!(
        out,
        "Send your email with the subject {} to every address below:",
        paint(ansi::CYAN, &compose_subject(code))
    );
    for inbox in inboxes {
        let _ = writeln!(out, "  {:<28} {}", inbox.email, paint(ansi::DIM, &inbox.provider));
        let _ = writeln!(out, "    {}", inbox.mailto_link(code));
    }
    out
}

fn format_placements(out: &mut String, results: &[PlacementResult]) {
    for result in results {
        let provider = result.provider.as_deref().unwrap_or("");
        let _ = write!(
            out,
            "  {:<28} {:<14}",
            result.email,
            paint(tone_color(result.folder.tone()), result.folder.label())
        );
        if !provider.is_empty() {
            let _ = write!(out, " {}", paint(ansi::DIM, provider));
        }
        if let Some(at) = result.received_at {
            let _ = write!(out, " {}", at.format("%Y-%m-%d %H:%M"));
        }
        out.push('\n');
    }
}

fn format_tally(out: &mut String, results: &[PlacementResult]) {
    if results.is_empty() {
        return;
    }
    let tally = PlacementTally::from_results(results);
    let counts = Folder::ALL
        .iter()
        .map(|f| format!("{} {}", f.label(), tally.get(*f)))
        .collect::<Vec<_>>()
        .join(", ");
    let _ = writeln!(out, "  {}", counts);
}

pub fn format_session(session: &TestSession) -> String {
    let mut out = String::new();
    if let Some(code) = &session.test_code {
        let _ = writeln!(out, "Test {}: {}", code, session.state);
    } else {
        let _ = writeln!(out, "Test: {}", session.state);
    }
    if let Some(progress) = &session.progress {
        let _ = writeln!(out, "Inboxes checked: {}", progress);
    }
    if let Some(score) = session.final_score() {
        let _ = writeln!(out, "{}", score_line(score));
    }
    format_tally(&mut out, &session.results);
    format_placements(&mut out, &session.results);
    if let Some(error) = &session.last_error {
        let _ = writeln!(out, "{} {}", paint(ansi::RED, "Error:"), error.message);
    }
    out
}

pub fn format_report(report: &Report) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Report for test {}", paint(ansi::BOLD, report.test_code.as_str()));
    let _ = writeln!(out, "{}", score_line(report.deliverability_score));
    let _ = writeln!(out, "Overall status: {}", report.overall_status);
    let s = &report.summary;
    let _ = writeln!(
        out,
        "  Inbox {}, Spam {}, Promotions {}, Not Received {} (of {})",
        s.inbox_count, s.spam_count, s.promotions_count, s.not_received_count, s.total_inboxes
    );
    format_placements(&mut out, &report.results);
    if !report.recommendations.is_empty() {
        let _ = writeln!(out, "Recommendations:");
        for rec in &report.recommendations {
            let _ = writeln!(
                out,
                "  {} {}",
                paint(tone_color(&rec.kind), &rec.title),
                rec.message
            );
        }
    }
    out
}

pub fn format_history(history: &TestHistory) -> String {
    if history.tests.is_empty() {
        return "No tests yet.\n".to_string();
    }
    let mut out = String::new();
    for test in &history.tests {
        let when = test
            .created_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        let score = if test.status == DetectionStatus::Completed {
            format!("{:>3}/100", test.score())
        } else {
            "      -".to_string()
        };
        let _ = writeln!(
            out,
            "  {:<10} {:<12} {} {}",
            test.test_code,
            test.status,
            score,
            paint(ansi::DIM, &when)
        );
    }
    out
}

pub fn format_statistics(stats: &Statistics) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Tests run: {}", stats.total_tests);
    let _ = writeln!(out, "Average score: {:.1}", stats.average_score);
    let _ = writeln!(out, "Emails tracked: {}", stats.total_emails);
    for folder in Folder::ALL {
        let _ = writeln!(
            out,
            "  {:<14} {}",
            paint(tone_color(folder.tone()), folder.label()),
            stats.folder_total(folder)
        );
    }
    let _ = writeln!(out, "Trend: {}", stats.trend);
    out
}

/// One line for a failed status check. Errors a retry cannot fix, such as
/// a rejected request or an unreadable body, are flagged as such.
pub fn transient_line(error: &ServiceError, consecutive: u32) -> String {
    if error.is_transient() {
        format!(
            "{} {} (attempt {}, retrying)",
            paint(ansi::YELLOW, "Status check failed:"),
            error,
            consecutive
        )
    } else {
        format!(
            "{} {} (attempt {}, unlikely to recover)",
            paint(ansi::RED, "Status check failed:"),
            error,
            consecutive
        )
    }
}

/// Prints lifecycle progress as it happens.
pub struct ConsoleCallback {
    quiet: bool,
}

impl ConsoleCallback {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

#[async_trait]
impl LifecycleCallback for ConsoleCallback {
    async fn on_state_change(&self, _from: LifecycleState, to: LifecycleState) {
        if self.quiet {
            return;
        }
        match to {
            LifecycleState::Generating => println!("Creating test..."),
            LifecycleState::Detecting => println!("Detection started. Checking test inboxes..."),
            _ => {}
        }
    }

    async fn on_progress(&self, progress: &Progress, status: &DetectionStatus) {
        if !self.quiet {
            println!("  {} ({})", paint(ansi::DIM, &format!("{} inboxes checked", progress)), status);
        }
    }

    async fn on_transient_error(&self, error: &ServiceError, consecutive: u32) {
        eprintln!("  {}", transient_line(error, consecutive));
    }
}
