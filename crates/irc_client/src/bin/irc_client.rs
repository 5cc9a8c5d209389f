use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use flexi_logger::{Duplicate, FileSpec, Logger};
use irc_client::cli::Cli;
use irc_client::client::{ClientCore, ClientEventSink};
use irc_client::config::ClientConfig;
use irc_proto::Message;
use log::{error, info};

/// Renders incoming traffic to the log until a real terminal UI is wired in.
struct LoggingEventSink;

impl ClientEventSink for LoggingEventSink {
    fn on_connected(&self) {
        info!("connected");
    }

    fn on_message(&self, msg: &Message) {
        let source = msg.source.as_deref().unwrap_or("*");
        info!("{source} {} {}", msg.command, msg.params.join(" "));
    }

    fn on_disconnected(&self, reason: &str) {
        info!("disconnected: {reason}");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = ClientConfig::from_cli(&cli);

    let mut logger = Logger::try_with_str(&config.log_level)
        .unwrap_or_else(|_| Logger::try_with_str("info").expect("built-in level parses"));
    logger = logger.duplicate_to_stderr(Duplicate::All);
    if let Some(path) = &config.log_file {
        logger = logger.log_to_file(FileSpec::try_from(path.clone()).unwrap_or_default());
    }
    if logger.start().is_err() {
        eprintln!("failed to initialize logging");
        return ExitCode::from(1);
    }

    let sink: Arc<dyn ClientEventSink> = Arc::new(LoggingEventSink);

    let mut attempts_left = config.reconnect_attempts + 1;
    let (_core, reader_handle, writer_handle) = loop {
        info!("connecting to {}:{}", config.hostname, config.port);
        attempts_left -= 1;
        match ClientCore::connect(&config, sink.clone()).await {
            Ok(handles) => break handles,
            Err(e) if attempts_left > 0 => {
                error!("connection failed: {e}, {attempts_left} attempt(s) left");
                tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            }
            Err(e) => {
                error!("connection failed: {e}");
                return ExitCode::from(1);
            }
        }
    };

    let _ = reader_handle.await;
    writer_handle.abort();
    ExitCode::SUCCESS
}
