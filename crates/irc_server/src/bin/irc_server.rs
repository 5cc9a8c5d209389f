use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use flexi_logger::{Duplicate, FileSpec, Logger};
use irc_proto::ChanModeSpec;
use irc_server::cli::Cli;
use irc_server::config::{Config, FileConfig};
use irc_server::file_transfer::FileTransferService;
use irc_server::server::ServerLoop;
use irc_server::world::WorldModel;
use log::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let file_config = match &cli.config {
        Some(path) => match FileConfig::load(path) {
            Ok(c) => Some(c),
            Err(e) => {
                eprintln!("failed to load config file {}: {e}", path.display());
                return ExitCode::from(2);
            }
        },
        None => None,
    };
    let config = Arc::new(Config::resolve(file_config, &cli));

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

    info!("starting {} {}", config.server_name, config.version);

    let world = Arc::new(WorldModel::new(
        config.server_name.clone(),
        config.casemapping,
        ChanModeSpec::parse("beI,k,l,imnpst"),
        config.max_nick_len,
        config.max_channel_name_len,
        config.max_topic_len,
        config.password.clone(),
        config.whowas_history_len,
    ));

    let server = ServerLoop {
        world: world.clone(),
        config: config.clone(),
    };
    let transfer = FileTransferService::new(config.dcc_idle_timeout_secs);

    let bind_address = config.bind_address.clone();
    let file_transfer_port = config.file_transfer_port;

    let server_result = tokio::select! {
        res = server.run() => res,
        res = transfer.run(&bind_address, file_transfer_port) => res,
    };

    if let Err(e) = server_result {
        error!("fatal server error: {e}");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}
