//! irc-muster-server library crate: the world model, per-connection session
//! FSM, connection loop, and DCC rendezvous service, wired together by
//! `bin/irc_server.rs`.

pub mod cli;
pub mod config;
pub mod errors;
pub mod file_transfer;
pub mod server;
pub mod session;
pub mod world;
