use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use interaction_recorder::{
    check_timeline, export_operation_logs, load_operation_logs, pretty_print_operation_logs,
    summarize, InteractionRecorder, JsonFileStorage, MemoryPage, OperationRecord, RecorderConfig,
    StructureTriggerConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "interaction-log")]
#[command(about = "Inspect and check recorded interaction logs", version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pretty-print a log file
    Print { file: PathBuf },

    /// Verify timestamps never go backwards and scroll records carry no target
    Check { file: PathBuf },

    /// Count records per action and per url
    Summary { file: PathBuf },

    /// Record a scripted session against an in-memory page and export it
    Demo {
        /// Directory for the persisted slot
        #[arg(long, default_value = ".")]
        storage_dir: PathBuf,

        /// Where to write the exported log
        #[arg(short, long, default_value = "interaction_log.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    match args.command {
        Command::Print { file } => {
            let logs = load(&file)?;
            println!("{}", pretty_print_operation_logs(&logs)?);
        }
        Command::Check { file } => {
            let logs = load(&file)?;
            check_timeline(&logs).with_context(|| format!("{} failed checks", file.display()))?;
            info!("✅ {} records, timeline ok", logs.len());
        }
        Command::Summary { file } => {
            let summary = summarize(&load(&file)?);
            println!("total: {}", summary.total);
            for (action, count) in &summary.by_action {
                println!("  {action:<14} {count}");
            }
            for (url, count) in &summary.by_url {
                println!("  {count:>5}  {url}");
            }
            if summary.unlocated > 0 {
                warn!("{} records have no xpath", summary.unlocated);
            }
        }
        Command::Demo {
            storage_dir,
            output,
        } => demo(storage_dir, output).await?,
    }

    Ok(())
}

fn load(file: &Path) -> Result<Vec<OperationRecord>> {
    load_operation_logs(file).with_context(|| format!("failed to read {}", file.display()))
}

async fn demo(storage_dir: PathBuf, output: PathBuf) -> Result<()> {
    let page = Arc::new(MemoryPage::new("https://example.com/login", "Sign in"));
    let body = page.document().body();
    let form = body.append("form");
    form.set_attribute("id", "login");
    let email = form.append("input");
    email.set_attribute("name", "email");
    let submit = form.append("button");
    submit.set_attribute("class", "btn primary").set_text("Sign in");

    let recorder = InteractionRecorder::builder(page.clone())
        .config(RecorderConfig {
            structure: StructureTriggerConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        })
        .storage(Arc::new(JsonFileStorage::new(&storage_dir)))
        .build()?;

    let restored = recorder.restore().await?;
    if restored > 0 {
        info!("📂 Continuing after {} stored records", restored);
    }

    let mut stream = std::pin::pin!(recorder.event_stream());
    recorder.enable();
    page.click(&email);
    page.type_into(&email, "user@example.com");
    page.scroll_to(0.0, 240.0);
    page.click(&submit);
    recorder.disable();

    for _ in 0..4 {
        match tokio::time::timeout(Duration::from_secs(1), stream.next()).await {
            Ok(Some(record)) => info!("📝 {} {:?}", record.action, record.target.map(|t| t.xpath)),
            _ => break,
        }
    }

    recorder.persisted().await;
    let logs = recorder.records();
    export_operation_logs(&logs, &output)?;
    info!("💾 Saved {} records to {}", logs.len(), output.display());
    Ok(())
}
