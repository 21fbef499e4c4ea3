//! CLI subcommand handlers.

use crate::output::{self, ConsoleCallback};
use crate::{Commands, ConfigAction};
use anyhow::Context as _;
use inboxcheck_core::persistence;
use inboxcheck_core::{
    HttpTestService, InboxCheckConfig, InboxCheckError, LifecycleCallback, PreferencesStore,
    TestCode, TestLifecycle, TestService, TestSession, ValidationError,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything a subcommand needs: configuration, the service client, and
/// the preferences store.
pub struct App {
    pub config: InboxCheckConfig,
    pub workspace: PathBuf,
    pub service: Arc<dyn TestService>,
    pub prefs: Option<PreferencesStore>,
    pub quiet: bool,
}

impl App {
    pub fn new(
        config: InboxCheckConfig,
        workspace: PathBuf,
        service: Arc<dyn TestService>,
        prefs: Option<PreferencesStore>,
        quiet: bool,
    ) -> Self {
        Self {
            config,
            workspace,
            service,
            prefs,
            quiet,
        }
    }

    /// Build the HTTP client and preferences store from configuration.
    pub fn from_config(
        config: InboxCheckConfig,
        workspace: PathBuf,
        quiet: bool,
    ) -> anyhow::Result<Self> {
        let service = HttpTestService::new(&config.service)
            .context("Failed to create test service client")?;
        let prefs = config
            .preferences_path
            .clone()
            .map(PreferencesStore::new)
            .or_else(PreferencesStore::default_location);
        Ok(Self::new(config, workspace, Arc::new(service), prefs, quiet))
    }

    fn callback(&self) -> Arc<dyn LifecycleCallback> {
        Arc::new(ConsoleCallback::new(self.quiet))
    }

    /// The explicit email, else the remembered one.
    fn resolve_email(&self, explicit: Option<String>) -> anyhow::Result<String> {
        if let Some(email) = explicit.map(|e| e.trim().to_string())
            && !email.is_empty()
        {
            return Ok(email);
        }
        let remembered = self.prefs.as_ref().and_then(|p| match p.last_email() {
            Ok(email) => email,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read preferences");
                None
            }
        });
        match remembered {
            Some(email) => Ok(email),
            None => Err(InboxCheckError::from(ValidationError::MissingField {
                field: "email".into(),
            }))
            .context("Pass --email; no previously used address is remembered"),
        }
    }

    fn remember(&self, email: &str) {
        if let Some(prefs) = &self.prefs
            && let Err(e) = prefs.remember_email(email)
        {
            tracing::warn!(error = %e, "Failed to save preferences");
        }
    }

    fn remembered_email(&self) -> String {
        self.prefs
            .as_ref()
            .and_then(|p| p.last_email().ok().flatten())
            .unwrap_or_default()
    }

    fn say(&self, text: &str) {
        if !self.quiet {
            print!("{}", text);
        }
    }
}

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, app: &App) -> anyhow::Result<()> {
    match command {
        Commands::New { email } => handle_new(app, email).await,
        Commands::Detect { code } => handle_detect(app, &code).await,
        Commands::Run { email, yes } => handle_run(app, email, yes).await,
        Commands::Watch { code } => handle_watch(app, &code).await,
        Commands::Results { code, json } => handle_results(app, &code, json).await,
        Commands::Report { code, pdf, send } => handle_report(app, &code, pdf, send).await,
        Commands::History { email } => handle_history(app, email).await,
        Commands::Stats { email } => handle_stats(app, email).await,
        Commands::Health => handle_health(app).await,
        Commands::Config { action } => handle_config(action, &app.workspace, None),
    }
}

fn parse_code(raw: &str) -> anyhow::Result<TestCode> {
    TestCode::parse(raw).map_err(InboxCheckError::from).context("Invalid test code")
}

/// Create a test and print the sending instructions.
async fn generate(app: &App, lifecycle: &TestLifecycle, email: &str) -> anyhow::Result<TestCode> {
    let code = lifecycle
        .generate(email)
        .await
        .context("Failed to create a test")?;
    app.remember(email);
    println!("{}", output::format_instructions(&code, &app.config.inboxes));
    Ok(code)
}

/// Drive the lifecycle to a terminal state, or until Ctrl-C.
async fn wait_for_result(lifecycle: &TestLifecycle, start: bool) -> anyhow::Result<TestSession> {
    let work = async {
        if start {
            lifecycle.detect().await
        } else {
            lifecycle.poll_until_terminal().await
        }
    };
    tokio::select! {
        outcome = work => match outcome {
            Ok(session) => Ok(session),
            Err(e) => {
                print!("{}", output::format_session(&lifecycle.snapshot()));
                Err(anyhow::Error::from(e).context("Detection did not complete"))
            }
        },
        _ = tokio::signal::ctrl_c() => {
            lifecycle.dispose();
            let code = lifecycle.test_code().map(|c| c.to_string()).unwrap_or_default();
            anyhow::bail!(
                "Interrupted. Detection keeps running on the service; resume with `inboxcheck watch {}`",
                code
            )
        }
    }
}

async fn handle_new(app: &App, email: Option<String>) -> anyhow::Result<()> {
    let email = app.resolve_email(email)?;
    let lifecycle = TestLifecycle::new(app.service.clone(), app.config.polling.clone())
        .with_callback(app.callback());
    let code = generate(app, &lifecycle, &email).await?;
    app.say(&format!(
        "Once the email is sent, run `inboxcheck detect {}`.\n",
        code
    ));
    Ok(())
}

async fn handle_detect(app: &App, code: &str) -> anyhow::Result<()> {
    let code = parse_code(code)?;
    let lifecycle = TestLifecycle::from_code(
        app.service.clone(),
        app.config.polling.clone(),
        code,
        app.remembered_email(),
    )
    .with_callback(app.callback());
    let session = wait_for_result(&lifecycle, true).await?;
    print!("{}", output::format_session(&session));
    Ok(())
}

async fn handle_run(app: &App, email: Option<String>, yes: bool) -> anyhow::Result<()> {
    let email = app.resolve_email(email)?;
    let lifecycle = TestLifecycle::new(app.service.clone(), app.config.polling.clone())
        .with_callback(app.callback());
    let code = generate(app, &lifecycle, &email).await?;

    if !yes {
        let sent = dialoguer::Confirm::new()
            .with_prompt("Have you sent the email?")
            .default(true)
            .interact()?;
        if !sent {
            println!("Run `inboxcheck detect {}` once the email is sent.", code);
            return Ok(());
        }
    }

    let session = wait_for_result(&lifecycle, true).await?;
    print!("{}", output::format_session(&session));
    Ok(())
}

async fn handle_watch(app: &App, code: &str) -> anyhow::Result<()> {
    let code = parse_code(code)?;
    let lifecycle = TestLifecycle::resume(
        app.service.clone(),
        app.config.polling.clone(),
        code,
        app.remembered_email(),
    )
    .with_callback(app.callback());
    let session = wait_for_result(&lifecycle, false).await?;
    print!("{}", output::format_session(&session));
    Ok(())
}

async fn handle_results(app: &App, code: &str, json: bool) -> anyhow::Result<()> {
    let code = parse_code(code)?;
    let lifecycle = TestLifecycle::resume(
        app.service.clone(),
        app.config.polling.clone(),
        code,
        app.remembered_email(),
    );
    let refreshed = lifecycle.refresh().await;
    let session = lifecycle.snapshot();
    if json {
        println!("{}", serde_json::to_string_pretty(&session)?);
    } else {
        print!("{}", output::format_session(&session));
    }
    refreshed
        .map(|_| ())
        .context("Failed to fetch results")
}

/// Default file name for a downloaded PDF report.
fn default_pdf_path(workspace: &Path, code: &TestCode) -> PathBuf {
    workspace.join(format!("email-test-report-{}.pdf", code))
}

async fn handle_report(
    app: &App,
    code: &str,
    pdf: Option<Option<PathBuf>>,
    send: Option<String>,
) -> anyhow::Result<()> {
    let code = parse_code(code)?;
    let show = pdf.is_none() && send.is_none();

    if let Some(path) = pdf {
        let path = path.unwrap_or_else(|| default_pdf_path(&app.workspace, &code));
        let bytes = app
            .service
            .get_report_pdf(&code)
            .await
            .context("Failed to download the PDF report")?;
        persistence::atomic_write(&path, &bytes)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Saved PDF report to {}", path.display());
    }

    if let Some(email) = send {
        let email = email.trim();
        if email.is_empty() {
            return Err(InboxCheckError::from(ValidationError::MissingField {
                field: "email".into(),
            }))
            .context("--send needs an email address");
        }
        app.service
            .send_report_email(&code, email)
            .await
            .context("Failed to send the report")?;
        println!("Report sent to {}", email);
    }

    if show {
        let report = app
            .service
            .get_report(&code)
            .await
            .context("Failed to fetch the report")?;
        print!("{}", output::format_report(&report));
    }
    Ok(())
}

async fn handle_history(app: &App, email: Option<String>) -> anyhow::Result<()> {
    let email = app.resolve_email(email)?;
    let history = app
        .service
        .get_history(&email)
        .await
        .context("Failed to fetch test history")?;
    app.remember(&email);
    println!("Tests for {}:", email);
    print!("{}", output::format_history(&history));
    Ok(())
}

async fn handle_stats(app: &App, email: Option<String>) -> anyhow::Result<()> {
    let email = app.resolve_email(email)?;
    let stats = app
        .service
        .get_statistics(&email)
        .await
        .context("Failed to fetch statistics")?;
    app.remember(&email);
    println!("Statistics for {}:", email);
    print!("{}", output::format_statistics(&stats));
    Ok(())
}

async fn handle_health(app: &App) -> anyhow::Result<()> {
    let health = app
        .service
        .check_health()
        .await
        .with_context(|| format!("Test service at {} is unreachable", app.config.service.base_url))?;
    println!(
        "Test service at {} is {}",
        app.config.service.base_url, health.status
    );
    Ok(())
}

pub fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    base_url: Option<&str>,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = inboxcheck_core::config::workspace_config_path(workspace);
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }
            if let Some(dir) = config_path.parent() {
                std::fs::create_dir_all(dir)?;
            }

            let mut default_config = InboxCheckConfig::default();
            if let Some(url) = base_url {
                default_config.service.base_url = url.to_string();
            }
            let toml_str = toml::to_string_pretty(&default_config)?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let mut config = inboxcheck_core::config::load_config(Some(workspace))
                .context("Failed to load config")?;
            if let Some(url) = base_url {
                config.service.base_url = url.to_string();
            }
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            for warning in config.validate() {
                println!("# warning: {}", warning);
            }
            Ok(())
        }
    }
}
