//! MarshRPC Common Types and Transport
//!
//! This crate provides the wire protocol, the marshaling layer and the
//! transport abstraction shared by the MarshRPC client and server.
//!
//! # Overview
//!
//! MarshRPC is a typed, transport-agnostic RPC framework. Both peers agree on
//! a [`Contract`]: a named set of procedure declarations, each with a numeric
//! call id and a typed signature. This crate contains:
//!
//! - **Protocol Layer**: [`Payload`], the [`Marshal`] trait, contracts, and the
//!   request/response messages
//! - **Transport Layer**: the [`transport::Transport`] trait with an in-process
//!   pair and a length-prefixed TCP implementation
//!
//! # Wire Protocol
//!
//! - **Byte order**: big-endian for every integer, float and length prefix
//! - **Request**: `[call_id: u32] + [encoded arguments]`
//! - **Response**: `[status: u8] + [encoded result | error descriptor]`
//! - **TCP frame**: `[4-byte length prefix as u32 big-endian] + [payload]`
//!
//! # Example
//!
//! ```
//! use marshrpc_common::{from_payload, to_payload, Contract, Declaration};
//!
//! const ADD: Declaration<(i32, i32), i32> = Declaration::new(1, "add");
//!
//! let contract = Contract::builder("calc").declare(&ADD).build().unwrap();
//! assert!(contract.check(&ADD).is_ok());
//!
//! let payload = to_payload(&(2i32, 3i32)).unwrap();
//! assert_eq!(payload.as_bytes(), &[0, 0, 0, 2, 0, 0, 0, 3]);
//! let (a, b): (i32, i32) = from_payload(payload).unwrap();
//! assert_eq!(a + b, 5);
//! ```

pub mod protocol;
pub mod transport;

pub use protocol::*;
