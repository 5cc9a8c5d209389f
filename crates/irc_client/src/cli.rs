//! Command-line surface for `irc-muster-client`, `clap`-derived to match the
//! server's `cli.rs` idiom.

use std::net::Ipv4Addr;
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

/// irc-muster-client: a Modern-IRC client with DCC file-transfer initiation.
#[derive(Debug, Parser)]
#[command(name = "irc-muster-client", version)]
pub struct Cli {
    /// Server hostname or address to connect to.
    pub hostname: String,

    /// Server port.
    #[arg(short = 'p', long, default_value_t = 6667)]
    pub port: u16,

    /// Nickname to register with.
    #[arg(short = 'n', long)]
    pub nick: String,

    /// Real name (GECOS) sent with USER.
    #[arg(short = 'r', long)]
    pub realname: Option<String>,

    /// Channel to auto-join after registration.
    #[arg(short = 'c', long)]
    pub channel: Option<String>,

    /// CTCP CLIENTINFO text advertised in response to CTCP CLIENTINFO queries.
    #[arg(short = 'C', long)]
    pub ctcp_client_info: Option<String>,

    /// Server connection password (PASS).
    #[arg(short = 's', long)]
    pub server_password: Option<String>,

    /// Number of reconnect attempts after an unexpected disconnect.
    #[arg(short = 'R', long, default_value_t = 0)]
    pub reconnect_attempts: u32,

    /// Ephemeral port range MIN-MAX reserved for direct-connect DCC fallback.
    /// The default rendezvous-through-server DCC flow does not use it.
    #[arg(short = 'P', long, value_parser = parse_port_range, default_value = "49152-65535")]
    pub dcc_port_range: (u16, u16),

    /// Port the server's FileTransferService listens on. Defaults to one
    /// above `--port`, matching the server's own `port`/`file_transfer_port`
    /// default pairing (6667/6668).
    #[arg(long)]
    pub dcc_service_port: Option<u16>,

    /// Log level: trace, debug, info, warn, error.
    #[arg(short = 'l', long, default_value = "info")]
    pub log_level: String,

    /// Write logs to this file instead of stderr.
    #[arg(short = 'L', long)]
    pub log_file: Option<PathBuf>,

    /// Overrides auto-detected public IPv4 address advertised in DCC SEND.
    #[arg(short = 'm', long)]
    pub my_address: Option<Ipv4Addr>,
}
