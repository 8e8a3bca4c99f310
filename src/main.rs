use clap::{Parser, Subcommand};
use factura_robot::config::{Config, Credentials, OcrMode};
use factura_robot::error::RobotError;
use factura_robot::extract::ocr::load_prompt;
use factura_robot::extract::{AssistedExtractor, OpenAiService};
use factura_robot::maintenance;
use factura_robot::portal::BridgeBrowser;
use factura_robot::request::SearchRequest;
use factura_robot::robot::Robot;
use factura_robot::storage::{DocumentKind, DocumentStore};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "factura-robot", version, about = "Endesa portal invoice robot")]
struct Cli {
    /// Configuration file; defaults apply when it does not exist.
    #[arg(long, default_value = "factura-robot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract every invoice issued in a date range and print the records as JSON.
    Run {
        /// First emission date, DD/MM/YYYY.
        #[arg(long)]
        from: String,
        /// Last emission date, DD/MM/YYYY.
        #[arg(long)]
        to: String,
        /// Restrict the search to one supply point.
        #[arg(long)]
        cups: Option<String>,
    },
    /// Print a downloaded document, base64-encoded.
    Document {
        #[arg(long)]
        cups: String,
        #[arg(long)]
        invoice: String,
        /// xml, pdf or html
        #[arg(long, default_value = "pdf")]
        kind: DocumentKind,
    },
    /// Empty the download and export directories and truncate the run log.
    Cleanup,
}

fn init_tracing(log_file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(dir) = log_file.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(log_file)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_writer(std::io::stderr),
        )
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let cfg = Config::load_or_default(&cli.config)?;
    init_tracing(&cfg.paths.log_file)?;

    match cli.command {
        Command::Run { from, to, cups } => {
            let request = SearchRequest::parse(&from, &to, cups.as_deref())?;
            let creds = Credentials::from_env()
                .ok_or(RobotError::MissingCredentials("PORTAL_USER / PORTAL_PASSWORD"))?;

            let assisted = match cfg.ocr.mode {
                OcrMode::Off => None,
                OcrMode::Always | OcrMode::Fallback => Some(AssistedExtractor::new(
                    Box::new(OpenAiService::from_env(&cfg.ocr)),
                    load_prompt(&cfg.ocr)?,
                )),
            };
            let browser = BridgeBrowser::new(&cfg.bridge);

            let robot = Robot::new(cfg, Box::new(browser), assisted);
            let records = robot.run(&creds, &request).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        Command::Document {
            cups,
            invoice,
            kind,
        } => {
            let store = DocumentStore::new(&cfg.paths.temp_root);
            let doc = store.read_base64(kind, &cups, &invoice)?;
            info!(file = %doc.file_name, size = doc.size, "Document read");
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        Command::Cleanup => {
            let report = maintenance::cleanup(&cfg.paths)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
