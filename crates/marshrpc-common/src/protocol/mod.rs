pub mod contract;
pub mod error;
pub mod marshal;
pub mod message;
pub mod payload;


pub use contract::{Contract, ContractBuilder, Declaration, ProcedureInfo, Signature};
pub use error::{CallId, ErrorKind, RemoteError, Result, RpcError};
pub use marshal::{from_payload, to_payload, ByValue, Marshal};
pub use message::{encode_failure, encode_success, Request, Response, Status};
pub use payload::Payload;
