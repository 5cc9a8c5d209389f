//! Resolved client configuration, built from [`crate::cli::Cli`]. Mirrors the
//! shape of `irc_server::config::Config` (fully resolved, no leftover
//! `Option` fields to unwrap at call sites) without a TOML layer, since the
//! client's entire surface is exposed through CLI flags.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use crate::cli::Cli;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub hostname: String,
    pub port: u16,
    pub nick: String,
    pub realname: String,
    pub channel: Option<String>,
    pub ctcp_client_info: String,
    pub server_password: Option<String>,
    pub reconnect_attempts: u32,
    pub dcc_port_min: u16,
    pub dcc_port_max: u16,
    pub dcc_service_port: u16,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub my_address: Option<Ipv4Addr>,
}

impl ClientConfig {
    pub fn from_cli(cli: &Cli) -> Self {
        ClientConfig {
            hostname: cli.hostname.clone(),
            port: cli.port,
            nick: cli.nick.clone(),
            realname: cli.realname.clone().unwrap_or_else(|| cli.nick.clone()),
            channel: cli.channel.clone(),
            ctcp_client_info: cli
                .ctcp_client_info
                .clone()
                .unwrap_or_else(|| "PING VERSION TIME CLIENTINFO DCC".to_string()),
            server_password: cli.server_password.clone(),
            reconnect_attempts: cli.reconnect_attempts,
            dcc_port_min: cli.dcc_port_range.0,
            dcc_port_max: cli.dcc_port_range.1,
            dcc_service_port: cli.dcc_service_port.unwrap_or(cli.port + 1),
            log_level: cli.log_level.clone(),
            log_file: cli.log_file.clone(),
            my_address: cli.my_address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn realname_and_ctcp_info_default_from_nick_and_builtin_list() {
        let cli = Cli::parse_from(["irc-muster-client", "irc.example", "-n", "alice"]);
        let config = ClientConfig::from_cli(&cli);
        assert_eq!(config.realname, "alice");
        assert_eq!(config.ctcp_client_info, "PING VERSION TIME CLIENTINFO DCC");
        assert_eq!(config.dcc_service_port, 6668);
        assert_eq!(config.dcc_port_min, 49152);
        assert_eq!(config.dcc_port_max, 65535);
    }

    #[test]
    fn explicit_flags_override_defaults() {
        let cli = Cli::parse_from([
            "irc-muster-client",
            "irc.example",
            "-n",
            "alice",
            "-r",
            "Alice Example",
            "-p",
            "7000",
            "--dcc-service-port",
            "9000",
        ]);
        let config = ClientConfig::from_cli(&cli);
        assert_eq!(config.realname, "Alice Example");
        assert_eq!(config.port, 7000);
        assert_eq!(config.dcc_service_port, 9000);
    }
}
