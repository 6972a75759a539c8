//! MarshRPC Client
//!
//! Typed client stubs over any [`marshrpc_common::transport::Transport`].

pub mod client;

pub use client::{Client, ClientConfig};
