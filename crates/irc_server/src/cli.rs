//! Command-line surface, `clap`-derived. The teacher declared `clap` as a
//! workspace dependency but never wired it into `bin/irc_server.rs`, which
//! hardcoded `127.0.0.1:6667` and parsed no arguments at all.

use std::path::PathBuf;

use clap::Parser;

fn parse_port_range(s: &str) -> Result<(u16, u16), String> {
    let (min, max) = s
        .split_once('-')
        .ok_or_else(|| format!("expected MIN-MAX, got `{s}`"))?;
    let min: u16 = min.parse().map_err(|_| format!("bad port: {min}"))?;
    let max: u16 = max.parse().map_err(|_| format!("bad port: {max}"))?;
    if min > max {
        return Err(format!("range start {min} is after end {max}"));
    }
    Ok((min, max))
}

/// irc-muster-server: a Modern-IRC server with a DCC file-transfer rendezvous.
#[derive(Debug, Parser)]
#[command(name = "irc-muster-server", version)]
pub struct Cli {
    /// Port to listen on for IRC client connections.
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Address/hostname to bind to.
    #[arg(short = 'H', long)]
    pub hostname: Option<String>,

    /// Log level: trace, debug, info, warn, error.
    #[arg(short = 'l', long, default_value = "info")]
    pub log_level: String,

    /// Write logs to this file instead of stderr.
    #[arg(short = 'L', long)]
    pub log_file: Option<PathBuf>,

    /// Server connection password (PASS).
    #[arg(short = 'P', long)]
    pub password: Option<String>,

    /// Path to a MOTD text file.
    #[arg(short = 'f', long)]
    pub motd_file: Option<PathBuf>,

    /// Idle/ping timeout in milliseconds.
    #[arg(short = 'i', long)]
    pub idle_timeout_ms: Option<u64>,

    /// PING heartbeat frequency in milliseconds.
    #[arg(short = 'I', long)]
    pub ping_frequency_ms: Option<u64>,

    /// Server name advertised to clients.
    #[arg(short = 'S', long)]
    pub server_name: Option<String>,

    /// Operator login name accepted by OPER.
    #[arg(short = 'o', long)]
    pub oper_name: Option<String>,

    /// Operator password accepted by OPER.
    #[arg(short = 'O', long)]
    pub oper_password: Option<String>,

    /// Network name advertised via ISUPPORT NETWORK=.
    #[arg(short = 'N', long)]
    pub network_name: Option<String>,

    /// Maximum number of simultaneous client connections.
    #[arg(short = 'M', long)]
    pub max_clients: Option<usize>,

    /// FileTransferService DCC port range MIN-MAX, e.g. 49152-65535.
    #[arg(short = 'D', long, value_parser = parse_port_range)]
    pub dcc_port_range: Option<(u16, u16)>,

    /// Port for the FileTransferService rendezvous listener.
    #[arg(long)]
    pub file_transfer_port: Option<u16>,

    /// Path to a TOML configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
}
