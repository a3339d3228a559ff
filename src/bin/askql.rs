//! askql — ask your database a question
//!
//! # Usage
//!
//! ```bash
//! # Against the built-in demo database
//! askql "how many policies are active"
//!
//! # Against your own SQLite database
//! askql "top 10 organizations by credit limit" --database-url sqlite:mydata.db
//!
//! # Show the SQL without executing it
//! askql "unique status in claims" --dry-run
//!
//! # Interactive session with a feedback loop
//! askql repl
//! ```

use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use tracing_subscriber::EnvFilter;

use askql::demo;
use askql::prelude::*;

#[derive(Parser)]
#[command(name = "askql")]
#[command(version)]
#[command(about = "Ask your database a question in plain English", long_about = None)]
#[command(after_help = "EXAMPLES:
    askql 'how many policies are active'
    askql 'top 10 organizations by credit limit' --explain
    askql 'unique status in claims' --dry-run --format json
    askql repl")]
struct Cli {
    /// The question to translate
    question: Option<String>,

    /// Don't execute, just show the generated SQL
    #[arg(short, long)]
    dry_run: bool,

    /// Show the rationale for the chosen translation
    #[arg(short, long)]
    explain: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// SQLite database URL; the demo database is used when absent
    #[arg(long, env = "ASKQL_DATABASE_URL")]
    database_url: Option<String>,

    /// Config file path (defaults to ~/.config/askql/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSONL file learned templates are loaded from and saved to
    #[arg(short, long, env = "ASKQL_LEARNED")]
    learned: Option<PathBuf>,

    /// JSONL file feedback events are appended to for audit
    #[arg(long, env = "ASKQL_FEEDBACK_LOG")]
    feedback_log: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive session: ask, inspect, correct
    Repl,
    /// Show the introspected schema
    Schema,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .init();

    if let Err(e) = run().await {
        eprintln!("{} {e:#}", "Error:".red().bold());
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AssistantConfig::from_path(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => AssistantConfig::load()?,
    };

    let executor = match &cli.database_url {
        Some(url) => Executor::connect(url)
            .await
            .with_context(|| format!("connecting to {url}"))?,
        None => {
            println!(
                "{}",
                "No database URL given; using the built-in demo database.".dimmed()
            );
            Executor::new(demo::create_demo_pool(&config).await?)
        }
    };

    let assistant = Assistant::from_pool(executor.pool(), config).await?;
    if let Some(path) = &cli.learned {
        let added = assistant.load_learned(path)?;
        if added > 0 {
            println!("{}", format!("Loaded {added} learned template(s).").dimmed());
        }
    }

    match &cli.command {
        Some(Commands::Schema) => {
            show_schema(&assistant);
            Ok(())
        }
        Some(Commands::Repl) => repl(&assistant, &executor, &cli).await,
        None => match &cli.question {
            Some(question) => ask(&assistant, &executor, question, &cli).await.map(|_| ()),
            None => {
                println!("{}", "askql — ask your database a question".cyan().bold());
                println!();
                println!("Usage: askql <QUESTION> [OPTIONS]");
                println!();
                println!("Try: askql --help");
                Ok(())
            }
        },
    }
}

/// Translate one question, print the SQL, execute it unless --dry-run.
/// Returns the translation so the REPL can attach feedback to it.
async fn ask(
    assistant: &Assistant,
    executor: &Executor,
    question: &str,
    cli: &Cli,
) -> Result<Option<Translation>> {
    let translation = match assistant.translate(question) {
        Ok(t) => t,
        Err(AskqlError::UnsupportedQuery {
            question, nearest, ..
        }) => {
            println!("{} {question}", "Cannot translate:".yellow().bold());
            if !nearest.is_empty() {
                println!("{}", "Closest known phrasings:".dimmed());
                for pattern in nearest {
                    println!("  {}", pattern.dimmed());
                }
            }
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    println!("{}", "SQL:".green().bold());
    println!("  {}", translation.query.sql.white());
    if !translation.query.params.is_empty() {
        let rendered: Vec<String> = translation
            .query
            .params
            .iter()
            .map(|p| p.to_string())
            .collect();
        println!("  {} {}", "params:".dimmed(), rendered.join(", ").yellow());
    }

    if cli.explain {
        print_rationale(&translation.rationale);
    }

    if !cli.dry_run {
        let result = executor.run(&translation.query).await?;
        print_result(&result, &cli.format);
    }

    if translation.correction_priority > 0.7 {
        println!(
            "{}",
            "Not sure about this one. A correction would help me learn.".dimmed()
        );
    }

    Ok(Some(translation))
}

fn print_rationale(rationale: &Rationale) {
    println!("{}", "Why:".cyan().bold());
    println!(
        "  {} {} ({}, weight {:.2}, similarity {:.2})",
        "pattern:".dimmed(),
        rationale.pattern.white(),
        rationale.provenance,
        rationale.weight,
        rationale.similarity
    );
    for slot in &rationale.slots {
        println!(
            "  {} {} = {}",
            format!("{}:", slot.kind).dimmed(),
            slot.name,
            slot.resolved.yellow()
        );
    }
}

fn print_result(result: &QueryResult, format: &OutputFormat) {
    if result.is_empty() {
        println!("{}", "(no rows)".dimmed());
        return;
    }
    match format {
        OutputFormat::Json => {
            let rows: Vec<serde_json::Value> = result
                .rows
                .iter()
                .map(|row| {
                    result
                        .columns
                        .iter()
                        .cloned()
                        .zip(row.iter().cloned())
                        .collect::<serde_json::Map<_, _>>()
                        .into()
                })
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&rows).unwrap_or_default()
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(&result.columns);
            for row in &result.rows {
                table.add_row(row.iter().map(cell_text));
            }
            println!("{table}");
            println!("{} row(s)", result.len().to_string().cyan());
        }
    }
}

fn cell_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn show_schema(assistant: &Assistant) {
    for table in &assistant.catalog().metadata().tables {
        println!("{}", table.name.cyan().bold());
        for col in &table.columns {
            let mut notes = vec![col.decl_type.clone()];
            if !col.nullable {
                notes.push("not null".into());
            }
            let sample = col
                .samples
                .first()
                .map(|s| format!("  e.g. {s}"))
                .unwrap_or_default();
            println!(
                "  {} {}{}",
                col.name,
                notes.join(", ").dimmed(),
                sample.dimmed()
            );
        }
    }
}

async fn repl(assistant: &Assistant, executor: &Executor, cli: &Cli) -> Result<()> {
    println!("{}", "askql — interactive session".cyan().bold());
    println!("{}", "Ask questions in plain English. Commands:".dimmed());
    println!("  {}          - exit", ".exit".yellow());
    println!("  {}        - show the schema", ".schema".yellow());
    println!("  {} - correct the last answer", ".fix <SELECT ...>".yellow());
    println!();

    let stdin = std::io::stdin();
    let mut last: Option<(String, Translation)> = None;

    loop {
        print!("{}", "askql> ".cyan().bold());
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line {
            ".exit" | ".quit" | "exit" | "quit" => break,
            ".schema" => {
                show_schema(assistant);
                continue;
            }
            _ => {}
        }

        if let Some(corrected) = line.strip_prefix(".fix ") {
            let Some((question, translation)) = &last else {
                println!("{}", "Nothing to fix yet; ask a question first.".yellow());
                continue;
            };
            let feedback = Feedback::new(
                question,
                &translation.query.sql,
                corrected.trim(),
                Some(translation.query.template_id),
            );
            match assistant.apply_feedback(&feedback) {
                Ok(outcome) => {
                    let verb = match outcome.disposition {
                        FeedbackDisposition::Reinforced => "Reinforced",
                        FeedbackDisposition::Created => "Learned",
                    };
                    println!(
                        "{} template {} (weight {:.2})",
                        verb.green().bold(),
                        outcome.template_id,
                        outcome.weight
                    );
                    if let Some(path) = &cli.learned {
                        assistant.save_learned(path)?;
                    }
                    if let Some(path) = &cli.feedback_log {
                        askql::feedback::FeedbackLog::new(path).append(&feedback, &outcome)?;
                    }
                }
                Err(e) => println!("{} {e}", "Rejected:".red().bold()),
            }
            continue;
        }

        match ask(assistant, executor, line, cli).await {
            Ok(Some(translation)) => last = Some((line.to_string(), translation)),
            Ok(None) => {}
            Err(e) => println!("{} {e:#}", "Error:".red().bold()),
        }
    }

    println!("{}", "Bye.".green());
    Ok(())
}
