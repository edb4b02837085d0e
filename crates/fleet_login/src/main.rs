mod prompt;
mod token_file;

use std::ffi::OsStr;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use fleet_client::stream::ctrl_c;
use fleet_client::{Config, FleetClient, Frame, PromptingSelector};
use log::info;
use tokio::sync::mpsc;

use prompt::{read_line, read_secret, TerminalCaptcha, TerminalPrompt};

#[derive(Parser)]
#[command(name = "fleet_login")]
#[command(about = "Log in to the vehicle API and stream live telemetry")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(long, short, default_value = "false")]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in interactively and print the token JSON
    Login {
        /// Write the token here instead of stdout (`-` means stdout)
        #[arg(long, short)]
        out: Option<PathBuf>,
    },
    /// Print live data updates for one vehicle
    Stream {
        /// Token JSON written by `login`
        #[arg(long, env = "FLEET_TOKEN_FILE")]
        token_file: PathBuf,

        /// Vehicle id from the vehicle list, not the VIN
        #[arg(long)]
        vehicle_id: u64,

        /// Columns to subscribe to (defaults to the standard set)
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,
    },
}

fn init_logging(debug: bool) {
    let filter = if debug { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {} [{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match cli.command {
        Commands::Login { out } => login(out).await,
        Commands::Stream {
            token_file,
            vehicle_id,
            columns,
        } => stream(token_file, vehicle_id, columns).await,
    }
}

async fn login(out: Option<PathBuf>) -> anyhow::Result<()> {
    let username = read_line("Username")?;
    let password = read_secret("Password")?;

    let client = FleetClient::builder()
        .with_config(Config::load())
        .with_credentials(username, password)
        .with_mfa_handler(Arc::new(PromptingSelector::new(TerminalPrompt)))
        .with_captcha_solver(Arc::new(TerminalCaptcha))
        .build()
        .await?;
    let token = client.token().await?;

    match file_target(out) {
        Some(path) => {
            token_file::write(&path, &token)?;
            info!("Token written to {}", path.display());
        }
        None => std::io::stdout().write_all(&token_file::encode(&token)?)?,
    }
    Ok(())
}

/// `None` and `-` both mean stdout.
fn file_target(out: Option<PathBuf>) -> Option<PathBuf> {
    out.filter(|path| path.as_os_str() != OsStr::new("-"))
}

async fn stream(token_file: PathBuf, vehicle_id: u64, columns: Vec<String>) -> anyhow::Result<()> {
    let token = token_file::read(&token_file)?;
    let client = FleetClient::builder()
        .with_config(Config::load())
        .with_token(token)
        .build()
        .await?;

    let columns = if columns.is_empty() {
        client.streaming_config().columns.clone()
    } else {
        columns
    };

    let (tx, mut rx) = mpsc::channel::<Frame>(64);
    let names = columns.clone();
    let printer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            println!("{}", render(&frame, &names));
        }
    });

    let result = client
        .stream_until(vehicle_id, &columns, tx, ctrl_c())
        .await;
    printer.await?;
    result?;
    Ok(())
}

fn render(frame: &Frame, columns: &[String]) -> String {
    let timestamp = frame.values().first().copied().unwrap_or_default();
    let fields: Vec<String> = frame
        .columns(columns)
        .into_iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect();
    format!("{timestamp} {}", fields.join(" "))
}
