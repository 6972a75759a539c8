//! Call declarations and service contracts.
//!
//! A [`Declaration`] binds a wire call id to a typed signature: the argument
//! tuple `A` and the return type `R`. A [`Contract`] is the immutable set of
//! declarations a client and server agree on.
//!
//! # Example
//!
//! ```
//! use marshrpc_common::protocol::{Contract, Declaration};
//!
//! const ADD: Declaration<(i32, i32), i32> = Declaration::new(1, "add");
//! const PING: Declaration<(), ()> = Declaration::new(2, "ping");
//!
//! let contract = Contract::builder("calculator")
//!     .declare(&ADD)
//!     .declare(&PING)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(contract.len(), 2);
//! assert_eq!(contract.get(1).unwrap().name, "add");
//! ```

use std::any::type_name;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use crate::protocol::error::{CallId, Result, RpcError};
use crate::protocol::marshal::Marshal;

/// Argument and return type names of a declaration.
///
/// Two declarations with the same id must have equal signatures to be
/// considered the same procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub args: &'static str,
    pub ret: &'static str,
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.args, self.ret)
    }
}

/// A typed procedure declaration.
///
/// `A` is the argument list as a tuple (`()` for no arguments, `(T,)` for
/// one) and `R` the return type (`()` for void).
pub struct Declaration<A, R> {
    id: CallId,
    name: &'static str,
    _signature: PhantomData<fn(A) -> R>,
}

impl<A, R> Declaration<A, R> {
    pub const fn new(id: CallId, name: &'static str) -> Self {
        Self {
            id,
            name,
            _signature: PhantomData,
        }
    }

    pub const fn id(&self) -> CallId {
        self.id
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<A: Marshal, R: Marshal> Declaration<A, R> {
    pub fn signature(&self) -> Signature {
        Signature {
            args: type_name::<A>(),
            ret: type_name::<R>(),
        }
    }
}

impl<A, R> Clone for Declaration<A, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A, R> Copy for Declaration<A, R> {}

impl<A, R> fmt::Debug for Declaration<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Declaration")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("args", &type_name::<A>())
            .field("ret", &type_name::<R>())
            .finish()
    }
}

/// One entry of a contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcedureInfo {
    pub id: CallId,
    pub name: &'static str,
    pub signature: Signature,
}

/// An immutable set of declarations keyed by call id.
///
/// Contracts are built once at startup and shared read-only, typically in an
/// `Arc`, by every client and server built over them.
#[derive(Debug, Clone)]
pub struct Contract {
    name: String,
    procedures: BTreeMap<CallId, ProcedureInfo>,
}

impl Contract {
    pub fn builder(name: impl Into<String>) -> ContractBuilder {
        ContractBuilder {
            name: name.into(),
            procedures: BTreeMap::new(),
            duplicate: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, id: CallId) -> Option<&ProcedureInfo> {
        self.procedures.get(&id)
    }

    pub fn contains(&self, id: CallId) -> bool {
        self.procedures.contains_key(&id)
    }

    /// Call ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = CallId> + '_ {
        self.procedures.keys().copied()
    }

    pub fn procedures(&self) -> impl Iterator<Item = &ProcedureInfo> {
        self.procedures.values()
    }

    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }

    /// Verifies that `declaration` is part of this contract with the same
    /// signature.
    ///
    /// # Errors
    ///
    /// Returns `BadCall` if the id is not declared or is declared with a
    /// different name or signature.
    pub fn check<A: Marshal, R: Marshal>(&self, declaration: &Declaration<A, R>) -> Result<&ProcedureInfo> {
        let info = self.get(declaration.id()).ok_or_else(|| {
            RpcError::BadCall(format!(
                "procedure '{}' (call id {}) is not part of contract '{}'",
                declaration.name(),
                declaration.id(),
                self.name
            ))
        })?;

        let signature = declaration.signature();
        if info.name != declaration.name() || info.signature != signature {
            return Err(RpcError::BadCall(format!(
                "call id {} is declared as '{}: {}' in contract '{}', not '{}: {}'",
                info.id,
                info.name,
                info.signature,
                self.name,
                declaration.name(),
                signature
            )));
        }

        Ok(info)
    }
}

/// Builder returned by [`Contract::builder`].
pub struct ContractBuilder {
    name: String,
    procedures: BTreeMap<CallId, ProcedureInfo>,
    duplicate: Option<(CallId, &'static str)>,
}

impl ContractBuilder {
    pub fn declare<A: Marshal, R: Marshal>(mut self, declaration: &Declaration<A, R>) -> Self {
        let info = ProcedureInfo {
            id: declaration.id(),
            name: declaration.name(),
            signature: declaration.signature(),
        };

        if self.procedures.contains_key(&info.id) {
            self.duplicate.get_or_insert((info.id, info.name));
        } else {
            self.procedures.insert(info.id, info);
        }
        self
    }

    /// Finalizes the contract.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateProcedure` if two declarations share a call id.
    pub fn build(self) -> Result<Contract> {
        if let Some((id, name)) = self.duplicate {
            return Err(RpcError::DuplicateProcedure { id, name });
        }
        Ok(Contract {
            name: self.name,
            procedures: self.procedures,
        })
    }
}
