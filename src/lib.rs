//! # marshrpc
//!
//! Typed remote procedure calls over any duplex transport.
//!
//! A [`Contract`](protocol::Contract) lists numbered procedure
//! [`Declaration`](protocol::Declaration)s. Clients call them through
//! [`Client`], servers bind handlers to them through [`ServerBuilder`], and
//! both sides marshal arguments and results with the same [`Marshal`](protocol::Marshal)
//! impls.
//!
//! This crate only re-exports the workspace crates:
//!
//! - [`protocol`] and [`transport`] from `marshrpc-common`
//! - [`Client`] from `marshrpc-client`
//! - [`Server`] and friends from `marshrpc-server`
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use marshrpc::protocol::{Contract, Declaration, RemoteError};
//! use marshrpc::transport::NullTransport;
//! use marshrpc::{Client, ServerBuilder};
//!
//! const ADD: Declaration<(i32, i32), i32> = Declaration::new(1, "add");
//!
//! # #[tokio::main]
//! # async fn main() -> marshrpc::protocol::Result<()> {
//! let contract = Arc::new(Contract::builder("math").declare(&ADD).build()?);
//! let server = ServerBuilder::new(contract.clone())
//!     .bind(&ADD, |(a, b)| Ok::<i32, RemoteError>(a + b))
//!     .build()?;
//!
//! let (client_end, server_end) = NullTransport::pair();
//! let serving = tokio::spawn({
//!     let server = server.clone();
//!     async move { server.serve(server_end).await }
//! });
//!
//! let mut client = Client::new(client_end, contract);
//! assert_eq!(client.invoke(&ADD, (2, 3)).await?, 5);
//!
//! client.close().await?;
//! serving.await.expect("serve task panicked")?;
//! # Ok(())
//! # }
//! ```

pub use marshrpc_common::{marshal_enum, protocol, transport};

pub use marshrpc_client::{Client, ClientConfig};
pub use marshrpc_server::{ProcedureStats, Server, ServerBuilder, ServerConfig, ServerState, StatsSnapshot};
