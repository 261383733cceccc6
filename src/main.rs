//! Relaybot - Entry Point
//!
//! Options:
//! - --json-logs: structured JSON logs on stderr
//! - --help / -h: usage

use relaybot::Config;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Parse args
    let args: Vec<String> = std::env::args().collect();
    let json_logs = args.iter().any(|a| a == "--json-logs");
    let help_mode = args.iter().any(|a| a == "--help" || a == "-h");

    if help_mode {
        println!("Relaybot v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: relaybot [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --json-logs        Log to stderr as JSON");
        println!("  --help, -h         Show this help");
        println!();
        println!("Environment variables:");
        println!("  RELAY_BOT_TOKEN        Telegram bot token (falls back to TELOXIDE_TOKEN)");
        println!("  RELAY_OPERATOR_ID      User id of the operator");
        println!("  RELAY_MODE             direct (default) or topic");
        println!("  RELAY_GROUP_CHAT_ID    Forum group for topic mode");
        println!("  RELAY_PROXY            Proxy URL for Bot API traffic");
        println!("  RELAY_BLOCK_KEYWORDS   Comma separated drop keywords");
        println!("  RELAY_DATA_DIR         Where blocklist and topic map live");
        println!("  RELAY_ACK_DELAY_SECS   Acknowledgement lifetime (default: 10)");
        return Ok(());
    }

    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    if json_logs {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    info!("Relaybot v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    relaybot::telegram::run(config).await?;

    Ok(())
}
