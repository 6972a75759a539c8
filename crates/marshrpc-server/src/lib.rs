//! MarshRPC Server
//!
//! This crate binds handlers to the procedures of a [`Contract`] and serves
//! them over any [`Transport`]: one connection at a time with
//! [`Server::serve`], many concurrent connections with
//! [`Server::serve_connection`], or a TCP accept loop with [`Server::listen`].
//!
//! [`Contract`]: marshrpc_common::protocol::Contract
//! [`Transport`]: marshrpc_common::transport::Transport

mod dispatch;
pub mod server;
pub mod stats;


pub use server::{Server, ServerBuilder, ServerConfig, ServerState};
pub use stats::{ProcedureStats, StatsSnapshot};
