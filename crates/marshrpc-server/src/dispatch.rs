//! Handler slots keyed by call id.
//!
//! Each bound handler is wrapped in a type-erased slot that decodes the
//! argument tuple, invokes the handler and encodes the result. The table is
//! built once and never mutated, so connections share it without locking.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use marshrpc_common::protocol::{encode_success, CallId, Marshal, Payload, RemoteError, Request, RpcError};

/// Result of running one slot.
pub(crate) enum Outcome {
    /// Encoded success response
    Success(Payload),
    /// The handler reported an error
    Failed(RemoteError),
    /// The arguments could not be decoded; the handler never ran
    Rejected(RemoteError),
}

pub(crate) type Slot = Arc<dyn Fn(Request) -> BoxFuture<'static, Outcome> + Send + Sync>;

#[derive(Default)]
pub(crate) struct DispatchTable {
    slots: HashMap<CallId, Slot>,
}

impl DispatchTable {
    pub(crate) fn insert(&mut self, id: CallId, slot: Slot) -> bool {
        self.slots.insert(id, slot).is_none()
    }

    pub(crate) fn get(&self, id: CallId) -> Result<&Slot, RpcError> {
        self.slots.get(&id).ok_or(RpcError::UnknownProcedure(id))
    }

    pub(crate) fn contains(&self, id: CallId) -> bool {
        self.slots.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

/// Runs a slot, turning a panicking handler into an `Internal` failure.
pub(crate) async fn run(slot: &Slot, request: Request) -> Outcome {
    // Sync handlers run inside the slot call itself, so the call goes in the guarded future too
    match AssertUnwindSafe(async { slot(request).await }).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => {
            let message = panic_message(&*panic);
            tracing::error!("Handler panicked: {}", message);
            Outcome::Failed(RemoteError::internal(format!("handler panicked: {}", message)))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

fn complete<R: Marshal>(result: Result<R, RemoteError>) -> Outcome {
    match result {
        Ok(value) => match encode_success(&value) {
            Ok(payload) => Outcome::Success(payload),
            Err(e) => Outcome::Failed(RemoteError::internal(format!("failed to encode result: {}", e))),
        },
        Err(error) => Outcome::Failed(error),
    }
}

/// Any argument decode failure, truncation included, is reported as malformed.
fn reject(error: RpcError) -> Outcome {
    Outcome::Rejected(RemoteError::malformed(format!("bad arguments: {}", error)))
}

/// Wraps a synchronous handler. It runs inline on the connection task.
pub(crate) fn sync_slot<A, R, F>(handler: F) -> Slot
where
    A: Marshal + 'static,
    R: Marshal + 'static,
    F: Fn(A) -> Result<R, RemoteError> + Send + Sync + 'static,
{
    Arc::new(move |mut request: Request| {
        let outcome = match request.decode_args::<A>() {
            Ok(args) => complete(handler(args)),
            Err(e) => reject(e),
        };
        future::ready(outcome).boxed()
    })
}

pub(crate) fn async_slot<A, R, F, Fut>(handler: F) -> Slot
where
    A: Marshal + 'static,
    R: Marshal + Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, RemoteError>> + Send + 'static,
{
    Arc::new(move |mut request: Request| match request.decode_args::<A>() {
        Ok(args) => handler(args).map(complete).boxed(),
        Err(e) => future::ready(reject(e)).boxed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use marshrpc_common::protocol::ErrorKind;

    fn request(id: CallId, args: &(i32, i32)) -> Request {
        Request::decode(Request::encode(id, args).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_sync_slot_success() {
        let slot = sync_slot(|(a, b): (i32, i32)| Ok(a + b));

        match slot(request(1, &(2, 3))).await {
            Outcome::Success(payload) => assert_eq!(payload.as_bytes(), &[0, 0, 0, 0, 5]),
            _ => panic!("Expected success"),
        }
    }

    #[tokio::test]
    async fn test_async_slot_failure() {
        let slot = async_slot(|(_, _): (i32, i32)| async { Err::<i32, _>(RemoteError::internal("boom")) });

        match slot(request(1, &(2, 3))).await {
            Outcome::Failed(error) => assert_eq!(error, RemoteError::internal("boom")),
            _ => panic!("Expected handler failure"),
        }
    }

    #[tokio::test]
    async fn test_bad_arguments_never_reach_handler() {
        let slot = sync_slot(|_: (String,)| -> Result<(), RemoteError> { panic!("handler must not run") });

        match slot(request(1, &(2, 3))).await {
            Outcome::Rejected(error) => assert_eq!(error.kind, ErrorKind::MalformedPayload),
            _ => panic!("Expected rejection"),
        }
    }

    #[test]
    fn test_table_insert_reports_replacement() {
        let mut table = DispatchTable::default();
        assert!(table.insert(1, sync_slot(|(): ()| Ok(()))));
        assert!(!table.insert(1, sync_slot(|(): ()| Ok(()))));
        assert_eq!(table.len(), 1);
        assert!(table.contains(1));
        assert!(matches!(table.get(2), Err(RpcError::UnknownProcedure(2))));
    }

    #[tokio::test]
    async fn test_run_catches_sync_handler_panic() {
        let slot = sync_slot(|(a, _): (i32, i32)| -> Result<i32, RemoteError> {
            if a == 0 {
                panic!("zero is not allowed");
            }
            Ok(a)
        });

        match run(&slot, request(1, &(0, 3))).await {
            Outcome::Failed(error) => {
                assert_eq!(error.kind, ErrorKind::Internal);
                assert_eq!(error.message, "handler panicked: zero is not allowed");
            }
            _ => panic!("Expected handler failure"),
        }
        assert!(matches!(run(&slot, request(1, &(4, 3))).await, Outcome::Success(_)));
    }

    #[tokio::test]
    async fn test_run_catches_async_handler_panic() {
        let slot = async_slot(|(a, b): (i32, i32)| async move {
            tokio::task::yield_now().await;
            if b == 0 {
                panic!("{} / 0", a);
            }
            Ok::<i32, RemoteError>(a / b)
        });

        match run(&slot, request(1, &(7, 0))).await {
            Outcome::Failed(error) => assert_eq!(error.message, "handler panicked: 7 / 0"),
            _ => panic!("Expected handler failure"),
        }
    }
}
