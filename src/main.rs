use chrono::Utc;
use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

mod cli;

use adaptiq::admission::AdmissionController;
use adaptiq::ai::OpenAiGenerator;
use adaptiq::config::Config;
use adaptiq::daily::{DailySelector, local_today};
use adaptiq::domain::{AttemptRecord, Combo, QuestionType};
use adaptiq::hints::HintService;
use adaptiq::scoring::PriorityScorer;
use adaptiq::store::QuizStore;
use adaptiq::worker::{CycleReport, GenerationWorker};
use cli::Cli;
use cli::commands::{Commands, WorkerCommands};

fn setup_logging(config: &Config) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("adaptiq")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("adaptiq.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let mut builder = env_logger::Builder::from_default_env();
    // RUST_LOG wins over the config file
    if let Some(level) = config.log_level.as_ref().filter(|_| std::env::var_os("RUST_LOG").is_none()) {
        builder.parse_filters(level);
    }
    builder.target(env_logger::Target::Pipe(target)).init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn open_store(config: &Config) -> Result<Arc<QuizStore>> {
    let store = QuizStore::open_at(&config.storage.db_path)
        .with_context(|| format!("Failed to open database at {}", config.storage.db_path.display()))?;
    Ok(Arc::new(store))
}

fn build_worker(config: &Config, store: Arc<QuizStore>) -> Result<GenerationWorker> {
    let generator = OpenAiGenerator::from_config(&config.ai).context("Failed to configure AI provider")?;
    let admission = Arc::new(AdmissionController::from_config(&config.admission));
    let scorer = Arc::new(PriorityScorer::new(Arc::clone(&store), &config.scoring));
    Ok(GenerationWorker::new(
        config,
        store,
        admission,
        scorer,
        Arc::new(generator),
    ))
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    let store = open_store(config)?;

    match &cli.command {
        Commands::Worker { command } => handle_worker_command(command, config, store).await,
        Commands::Assign { user, date } => handle_assign_command(*user, *date, config, store),
        Commands::Recalc { user } => handle_recalc_command(*user, config, store),
        Commands::Stats => handle_stats_command(config, store),
        Commands::Pause { user } => handle_pause_command(*user, true, store),
        Commands::Resume { user } => handle_pause_command(*user, false, store),
        Commands::Hint {
            user,
            language,
            level,
            question_type,
        } => handle_hint_command(*user, language, level, *question_type, config, store),
        Commands::Failures { limit } => handle_failures_command(*limit, store),
    }
}

async fn handle_worker_command(command: &WorkerCommands, config: &Config, store: Arc<QuizStore>) -> Result<()> {
    let worker = Arc::new(build_worker(config, store)?);
    match command {
        WorkerCommands::Once => {
            let report = worker.run_cycle().await.context("Generation cycle failed")?;
            print_report(&report);
        }
        WorkerCommands::Run => {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Ctrl-C received, stopping worker");
                    let _ = shutdown_tx.send(true);
                }
            });
            println!(
                "{} every {}s (Ctrl-C to stop)",
                "Generation worker running".cyan(),
                config.worker.interval_secs
            );
            worker.run(shutdown_rx).await.context("Generation worker failed")?;
            let status = worker.status()?;
            println!(
                "{} after {} cycles: {} generated, {} failed",
                "Stopped".yellow(),
                status.cycles_run,
                status.total_generated,
                status.total_failed
            );
        }
    }
    Ok(())
}

fn print_report(report: &CycleReport) {
    if report.skipped_paused {
        println!("{}", "Generation is globally paused; cycle skipped".yellow());
        return;
    }
    println!("{} {}", "Cycle:".green(), report.summary());
    if report.skipped_excluded + report.skipped_backoff + report.skipped_paused_users > 0 {
        println!(
            "  skipped: {} excluded, {} backing off, {} paused users",
            report.skipped_excluded, report.skipped_backoff, report.skipped_paused_users
        );
    }
    for id in &report.question_ids {
        println!("  new question {}", id);
    }
}

fn handle_assign_command(
    user_id: i64,
    date: Option<chrono::NaiveDate>,
    config: &Config,
    store: Arc<QuizStore>,
) -> Result<()> {
    let user = store.require_user(user_id)?;
    let date = date.unwrap_or_else(|| local_today(user.utc_offset_minutes, Utc::now()));
    info!("Assigning daily questions for user {} on {}", user_id, date);

    let selector = DailySelector::new(Arc::clone(&store), config.daily.clone());
    let rows = selector
        .assign_for_date(user_id, date)
        .with_context(|| format!("Failed to assign questions for {}", date))?;

    println!("{} {} questions for user {} on {}", "Assigned:".green(), rows.len(), user_id, date);
    for row in &rows {
        let mark = if row.is_completed { "x".green() } else { " ".normal() };
        println!("  [{}] question {}", mark, row.question_id);
    }

    let missing = selector.shortfall_for(user_id, date)?;
    if missing > 0 {
        println!("{} {} short of the daily goal", "Shortfall:".yellow(), missing);
        let hints = HintService::new(store, &config.hints);
        let created = hints.hint_user_combos(&user, Utc::now())?;
        println!("  requested generation for {} combos", created.len());
    }
    Ok(())
}

fn handle_recalc_command(user_id: i64, config: &Config, store: Arc<QuizStore>) -> Result<()> {
    store.require_user(user_id)?;
    let scorer = PriorityScorer::new(store, &config.scoring);
    let updated = scorer
        .recalculate(user_id)
        .with_context(|| format!("Failed to recalculate scores for user {}", user_id))?;
    println!("{} {} scores for user {}", "Recalculated:".green(), updated, user_id);
    Ok(())
}

/// Configured limits plus the persisted pause flags. Live slot usage only exists
/// inside a running worker, so it is not reported here.
fn stats_json(config: &Config, store: &QuizStore) -> Result<serde_json::Value> {
    let admission = AdmissionController::from_config(&config.admission);
    let mut paused_users: Vec<i64> = store.paused_user_ids()?.into_iter().collect();
    paused_users.sort_unstable();
    Ok(serde_json::json!({
        "admission_limits": {
            "global_limit": admission.global_limit(),
            "per_user_limit": admission.per_user_limit(),
        },
        "global_paused": store.is_globally_paused()?,
        "paused_users": paused_users,
    }))
}

fn handle_stats_command(config: &Config, store: Arc<QuizStore>) -> Result<()> {
    let stats = stats_json(config, &store)?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn handle_pause_command(user: Option<i64>, paused: bool, store: Arc<QuizStore>) -> Result<()> {
    let verb = if paused { "Paused:".yellow() } else { "Resumed:".green() };
    match user {
        Some(user_id) => {
            store.require_user(user_id)?;
            store.set_user_paused(user_id, paused, Utc::now())?;
            println!("{} generation for user {}", verb, user_id);
        }
        None => {
            store.set_globally_paused(paused)?;
            println!("{} generation globally", verb);
        }
    }
    Ok(())
}

fn handle_hint_command(
    user_id: i64,
    language: &str,
    level: &str,
    question_type: QuestionType,
    config: &Config,
    store: Arc<QuizStore>,
) -> Result<()> {
    if !config.supports(language, level) {
        eyre::bail!("Generation is not configured for {}/{}", language, level);
    }
    store.require_user(user_id)?;
    let combo = Combo::new(language, level, question_type);
    let hint = HintService::new(store, &config.hints).upsert_hint(user_id, &combo)?;
    println!(
        "{} {} (weight {}, expires {})",
        "Hinted:".green(),
        combo,
        hint.priority_weight,
        hint.expires_at.format("%H:%M:%S UTC")
    );
    Ok(())
}

fn handle_failures_command(limit: usize, store: Arc<QuizStore>) -> Result<()> {
    let failures = store.recent_failures(limit)?;
    if failures.is_empty() {
        println!("{}", "No failed generation attempts".green());
        return Ok(());
    }
    for attempt in &failures {
        print_failure(attempt);
    }
    Ok(())
}

fn print_failure(attempt: &AttemptRecord) {
    println!(
        "{} {} [{}] {} {}",
        attempt.finished_at.format("%Y-%m-%d %H:%M:%S"),
        attempt.combo(),
        attempt.error_class.as_deref().unwrap_or("unknown").red(),
        attempt.subject,
        attempt.error_message.as_deref().unwrap_or("")
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    setup_logging(&config).context("Failed to setup logging")?;
    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
