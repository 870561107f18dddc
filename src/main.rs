use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use youtrend_insights::config::{DatabaseSettings, LlmSettings};
use youtrend_insights::conversation::Message;
use youtrend_insights::dataset;
use youtrend_insights::schema::TRENDING_TABLE;
use youtrend_insights::{LlmClient, Orchestrator, PgConnector, QueryExecutor, ToolRegistry};

#[derive(Parser)]
#[command(name = "youtrend")]
#[command(about = "Ask questions about YouTube trending videos in plain language")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a single question
    Ask {
        prompt: String,
    },
    /// Interactive session; earlier exchanges are sent along as history
    Chat,
    /// Create the table if needed and bulk-insert a processed CSV
    Load {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long, default_value = TRENDING_TABLE)]
        table: String,
    },
    /// Check that the database is reachable and the trending table exists
    CheckDb,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let database = DatabaseSettings::from_env()?;
    let executor = Arc::new(QueryExecutor::new(Box::new(PgConnector::from_settings(
        &database,
    )?)));

    let outcome = match args.command {
        Command::Ask { prompt } => {
            let orchestrator = build_orchestrator(Arc::clone(&executor))?;
            println!("{}", orchestrator.respond(&prompt).await);
            Ok(())
        }
        Command::Chat => chat(build_orchestrator(Arc::clone(&executor))?).await,
        Command::Load { csv, table } => load(&executor, csv, &table).await,
        Command::CheckDb => check_db(&executor, &database).await,
    };

    executor.shutdown().await;
    outcome
}

fn build_orchestrator(executor: Arc<QueryExecutor>) -> Result<Orchestrator> {
    let llm = LlmSettings::from_env()?;
    info!("🤖 Using model {} at {}", llm.model, llm.base_url);
    Ok(Orchestrator::new(
        Arc::new(LlmClient::new(&llm)),
        executor,
        ToolRegistry::new()?,
    ))
}

async fn chat(orchestrator: Orchestrator) -> Result<()> {
    let mut history: Vec<Message> = Vec::new();
    let stdin = io::stdin();

    println!("YouTrend Insights. Ask about trending videos, or type 'exit' to quit.");
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }
        if prompt.eq_ignore_ascii_case("exit") || prompt.eq_ignore_ascii_case("quit") {
            break;
        }

        let report = orchestrator.run_turn(&history, prompt).await;
        println!("{}\n", report.answer);
        history.extend(report.history_entries(prompt));
    }
    Ok(())
}

async fn load(executor: &QueryExecutor, path: PathBuf, table: &str) -> Result<()> {
    let file = File::open(&path).with_context(|| format!("Failed to open {}", path.display()))?;
    let loaded = dataset::load_csv(file, table)?;
    let inserted = executor.insert_rows(&loaded.table, &loaded.rows).await?;
    println!("✅ Inserted {} rows into '{}'", inserted, loaded.table.name);
    Ok(())
}

async fn check_db(executor: &QueryExecutor, database: &DatabaseSettings) -> Result<()> {
    println!("🔌 Testing PostgreSQL connection to {}", database.redacted());
    match executor.table_exists(TRENDING_TABLE).await {
        Ok(true) => println!("✅ Connected. Table '{}' is present.", TRENDING_TABLE),
        Ok(false) => println!(
            "⚠️  Connected, but table '{}' is missing. Run `youtrend load --csv <file>` first.",
            TRENDING_TABLE
        ),
        Err(e) => {
            error!("Database check failed: {}", e);
            return Err(e.into());
        }
    }
    Ok(())
}
