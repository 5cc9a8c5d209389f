//! Server configuration: TOML file (optional) merged with CLI flag
//! overrides, falling back to built-in defaults. Generalizes the teacher's
//! `Config::load` (`config.rs`), which only covered network/limits and had
//! no merge-with-CLI story since `bin/irc_server.rs` never parsed `clap`
//! args at all.

use std::fs;
use std::path::Path;

use irc_proto::CaseMapping;
use serde::Deserialize;

use crate::cli::Cli;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct FileConfig {
    pub server: Option<ServerFileConfig>,
    pub network: Option<NetworkFileConfig>,
    pub limits: Option<LimitsFileConfig>,
    pub dcc: Option<DccFileConfig>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ServerFileConfig {
    pub name: Option<String>,
    pub version: Option<String>,
    pub motd: Option<String>,
    pub password: Option<String>,
    pub casemapping: Option<String>,
    pub oper_name: Option<String>,
    pub oper_password: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NetworkFileConfig {
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub file_transfer_port: Option<u16>,
    pub network_name: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LimitsFileConfig {
    pub max_nick_len: Option<usize>,
    pub max_channel_name_len: Option<usize>,
    pub max_topic_len: Option<usize>,
    pub outbound_queue_size: Option<usize>,
    pub ping_frequency_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
    pub whowas_history_len: Option<usize>,
    pub max_clients: Option<usize>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DccFileConfig {
    pub port_min: Option<u16>,
    pub port_max: Option<u16>,
    pub idle_timeout_secs: Option<u64>,
}

/// Fully resolved configuration: file values override these defaults, CLI
/// flags override the file. Never left partially `Option`-valued once
/// resolved, unlike the teacher's `Config` whose `Option<usize>` fields
/// were unwrapped ad hoc at each call site.
#[derive(Debug, Clone)]
pub struct Config {
    pub server_name: String,
    pub network_name: String,
    pub version: String,
    pub motd: Vec<String>,
    pub password: Option<String>,
    pub casemapping: CaseMapping,
    pub bind_address: String,
    pub port: u16,
    pub file_transfer_port: u16,
    pub max_nick_len: usize,
    pub max_channel_name_len: usize,
    pub max_topic_len: usize,
    pub outbound_queue_size: usize,
    pub ping_frequency_ms: u64,
    pub idle_timeout_ms: u64,
    pub whowas_history_len: usize,
    pub max_clients: usize,
    pub oper_name: Option<String>,
    pub oper_password: Option<String>,
    pub dcc_port_min: u16,
    pub dcc_port_max: u16,
    pub dcc_idle_timeout_secs: u64,
    pub log_level: String,
    pub log_file: Option<std::path::PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_name: "irc-muster".to_string(),
            network_name: "IRC-Muster".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            motd: vec!["Welcome to irc-muster.".to_string()],
            password: None,
            casemapping: CaseMapping::Rfc1459,
            bind_address: "0.0.0.0".to_string(),
            port: 6667,
            file_transfer_port: 6668,
            max_nick_len: 9,
            max_channel_name_len: 50,
            max_topic_len: 390,
            outbound_queue_size: 256,
            ping_frequency_ms: 60_000,
            idle_timeout_ms: 120_000,
            whowas_history_len: 200,
            max_clients: 1024,
            oper_name: None,
            oper_password: None,
            dcc_port_min: 49152,
            dcc_port_max: 65535,
            dcc_idle_timeout_secs: 60,
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl FileConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        let config: FileConfig = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Config {
    /// Merges built-in defaults, an optional parsed TOML file, and CLI flags,
    /// in ascending precedence.
    pub fn resolve(file: Option<FileConfig>, cli: &Cli) -> Self {
        let mut cfg = Config::default();

        if let Some(file) = file {
            if let Some(s) = file.server {
                if let Some(v) = s.name {
                    cfg.server_name = v;
                }
                if let Some(v) = s.version {
                    cfg.version = v;
                }
                if let Some(v) = s.motd {
                    cfg.motd = v.lines().map(str::to_string).collect();
                }
                cfg.password = s.password.or(cfg.password);
                if let Some(v) = s.casemapping.and_then(|s| CaseMapping::from_isupport_str(&s)) {
                    cfg.casemapping = v;
                }
                cfg.oper_name = s.oper_name.or(cfg.oper_name);
                cfg.oper_password = s.oper_password.or(cfg.oper_password);
            }
            if let Some(n) = file.network {
                if let Some(v) = n.bind_address {
                    cfg.bind_address = v;
                }
                if let Some(v) = n.port {
                    cfg.port = v;
                }
                if let Some(v) = n.file_transfer_port {
                    cfg.file_transfer_port = v;
                }
                if let Some(v) = n.network_name {
                    cfg.network_name = v;
                }
            }
            if let Some(l) = file.limits {
                if let Some(v) = l.max_nick_len {
                    cfg.max_nick_len = v;
                }
                if let Some(v) = l.max_channel_name_len {
                    cfg.max_channel_name_len = v;
                }
                if let Some(v) = l.max_topic_len {
                    cfg.max_topic_len = v;
                }
                if let Some(v) = l.outbound_queue_size {
                    cfg.outbound_queue_size = v;
                }
                if let Some(v) = l.ping_frequency_ms {
                    cfg.ping_frequency_ms = v;
                }
                if let Some(v) = l.idle_timeout_ms {
                    cfg.idle_timeout_ms = v;
                }
                if let Some(v) = l.whowas_history_len {
                    cfg.whowas_history_len = v;
                }
                if let Some(v) = l.max_clients {
                    cfg.max_clients = v;
                }
            }
            if let Some(d) = file.dcc {
                if let Some(v) = d.port_min {
                    cfg.dcc_port_min = v;
                }
                if let Some(v) = d.port_max {
                    cfg.dcc_port_max = v;
                }
                if let Some(v) = d.idle_timeout_secs {
                    cfg.dcc_idle_timeout_secs = v;
                }
            }
        }

        // CLI flags take final precedence.
        if let Some(v) = cli.port {
            cfg.port = v;
        }
        if let Some(v) = &cli.hostname {
            cfg.bind_address = v.clone();
        }
        if let Some(v) = cli.file_transfer_port {
            cfg.file_transfer_port = v;
        }
        if let Some(v) = &cli.password {
            cfg.password = Some(v.clone());
        }
        if let Some(v) = cli.idle_timeout_ms {
            cfg.idle_timeout_ms = v;
        }
        if let Some(v) = cli.ping_frequency_ms {
            cfg.ping_frequency_ms = v;
        }
        if let Some(v) = &cli.server_name {
            cfg.server_name = v.clone();
        }
        if let Some(v) = &cli.network_name {
            cfg.network_name = v.clone();
        }
        if let Some(v) = cli.max_clients {
            cfg.max_clients = v;
        }
        if let Some((min, max)) = cli.dcc_port_range {
            cfg.dcc_port_min = min;
            cfg.dcc_port_max = max;
        }
        if let Some(v) = &cli.oper_name {
            cfg.oper_name = Some(v.clone());
        }
        if let Some(v) = &cli.oper_password {
            cfg.oper_password = Some(v.clone());
        }
        if let Some(v) = &cli.motd_file {
            if let Ok(content) = fs::read_to_string(v) {
                cfg.motd = content.lines().map(str::to_string).collect();
            }
        }
        cfg.log_level = cli.log_level.clone();
        cfg.log_file = cli.log_file.clone();

        cfg
    }
}
