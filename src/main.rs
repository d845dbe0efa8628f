use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sheet_bridge::config::Config;
use sheet_bridge::error::Result;
use sheet_bridge::sheet::{MemoryWorkbook, SqliteWorkbook, Workbook};
use sheet_bridge::{Destination, HttpJobClient, JobRequest, LogStatusSink, Orchestrator};

/// Submit one search to the job proxy and write the result table into a workbook.
#[derive(Debug, Parser)]
#[command(name = "bridge", version, about)]
struct Args {
    /// Page the backend should scrape.
    #[arg(long)]
    site_url: String,

    /// Search keywords passed through as tags.
    #[arg(long, default_value = "")]
    keywords: String,

    /// `new` writes to a fresh sheet, `active` appends to the active sheet.
    #[arg(long, default_value = "new")]
    destination: Destination,

    /// Workbook file; overrides WORKBOOK_PATH.
    #[arg(long)]
    workbook: Option<String>,

    /// Write into a throwaway in-memory workbook and print it.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg, args).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config, args: Args) -> Result<()> {
    // --- Workbook ---
    let workbook: Arc<dyn Workbook> = if args.dry_run {
        info!("Dry run: writing to an in-memory workbook");
        Arc::new(MemoryWorkbook::new())
    } else {
        let path = args.workbook.clone().unwrap_or_else(|| cfg.workbook_path.clone());
        Arc::new(SqliteWorkbook::open(&path).await?)
    };

    // --- Backend ---
    let backend = Arc::new(HttpJobClient::from_config(&cfg)?);
    info!(
        proxy = %cfg.proxy_base_url,
        interval_ms = cfg.poll_interval_ms,
        max_attempts = cfg.poll_max_attempts,
        "Job proxy at {}",
        cfg.proxy_base_url,
    );

    let orchestrator = Orchestrator::new(backend, Arc::clone(&workbook), cfg.poll_policy());

    // Ctrl-C stops polling; the run then reports cancellation and returns.
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let request = JobRequest::new(args.site_url, args.keywords, args.destination);
    let report = orchestrator.run(request, &LogStatusSink, cancel).await?;

    if let Some(written) = &report.written {
        let grid = workbook.read_sheet(&written.sheet).await?;
        info!("Sheet '{}' now holds {} row(s)", grid.name, grid.row_count());
        if args.dry_run {
            for row in grid.text_rows() {
                println!("{}", row.join("\t"));
            }
        }
    }

    Ok(())
}
