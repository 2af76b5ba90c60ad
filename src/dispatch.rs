//! Service dispatch: an explicit name-to-handler table.
//!
//! Inbound calls carry a `"service.method"` name. Handlers are registered
//! up front; lookup failures are request-level errors sent back to the
//! caller, never fatal to the connection.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::error::{Result, RoomwireError};

type HandlerFuture = Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send>>;
type Handler = Box<dyn Fn(Bytes) -> HandlerFuture + Send + Sync>;

/// The dispatch table. Built once at startup, then shared read-only.
#[derive(Default)]
pub struct ServiceRegistry {
    handlers: HashMap<String, Handler>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        ServiceRegistry::default()
    }

    /// Register a handler under `"<service>.<method>"`. Re-registering a
    /// name replaces the previous handler.
    ///
    /// # Panics
    ///
    /// When either half is empty or contains `'.'`. Such a name could never
    /// be reached by `dispatch`, so it is a programming error caught at
    /// registration rather than a silently dead handler.
    pub fn register<F, Fut>(&mut self, service: &str, method: &str, handler: F)
    where
        F: Fn(Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<u8>>> + Send + 'static,
    {
        assert!(
            !service.is_empty() && !service.contains('.'),
            "invalid service name {:?}",
            service
        );
        assert!(
            !method.is_empty() && !method.contains('.'),
            "invalid method name {:?}",
            method
        );
        let name = format!("{}.{}", service, method);
        self.handlers
            .insert(name, Box::new(move |payload| Box::pin(handler(payload))));
    }

    pub fn contains(&self, service_method: &str) -> bool {
        self.handlers.contains_key(service_method)
    }

    /// Run the handler registered under `service_method`.
    ///
    /// A name without exactly one dot between non-empty halves, or with no
    /// registered handler, fails with [`RoomwireError::Dispatch`].
    pub async fn dispatch(&self, service_method: &str, payload: Bytes) -> Result<Vec<u8>> {
        validate_name(service_method)?;
        let handler = self.handlers.get(service_method).ok_or_else(|| {
            RoomwireError::Dispatch(format!("no handler for {:?}", service_method))
        })?;
        handler(payload).await
    }
}

fn validate_name(service_method: &str) -> Result<()> {
    let mut parts = service_method.split('.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(service), Some(method), None) if !service.is_empty() && !method.is_empty() => Ok(()),
        _ => Err(RoomwireError::Dispatch(format!(
            "malformed service method {:?}",
            service_method
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ServiceRegistry {
        let mut r = ServiceRegistry::new();
        r.register("echo", "say", |payload: Bytes| async move {
            Ok(payload.to_vec())
        });
        r.register("echo", "fail", |_payload: Bytes| async move {
            Err(RoomwireError::Dispatch("handler refused".into()))
        });
        r
    }

    #[tokio::test]
    async fn test_dispatch_runs_handler() {
        let r = registry();
        let out = r
            .dispatch("echo.say", Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn test_handler_error_propagates() {
        let r = registry();
        let err = r.dispatch("echo.fail", Bytes::new()).await.unwrap_err();
        assert!(matches!(err, RoomwireError::Dispatch(_)));
    }

    #[tokio::test]
    async fn test_unknown_method_is_a_dispatch_error() {
        let r = registry();
        for name in ["echo.nope", "nope.say"] {
            let err = r.dispatch(name, Bytes::new()).await.unwrap_err();
            assert!(matches!(err, RoomwireError::Dispatch(_)), "{}", name);
        }
    }

    #[tokio::test]
    async fn test_malformed_names_rejected() {
        let r = registry();
        for name in ["", "echo", ".say", "echo.", "a.b.c"] {
            let err = r.dispatch(name, Bytes::new()).await.unwrap_err();
            assert!(matches!(err, RoomwireError::Dispatch(_)), "{}", name);
        }
    }

    #[test]
    #[should_panic(expected = "invalid service name")]
    fn test_dotted_service_rejected_at_registration() {
        // A dot inside a half would install a name dispatch can never
        // resolve.
        let mut r = ServiceRegistry::new();
        r.register("a.b", "c", |_| async { Ok(Vec::new()) });
    }

    #[test]
    #[should_panic(expected = "invalid method name")]
    fn test_empty_method_rejected_at_registration() {
        let mut r = ServiceRegistry::new();
        r.register("a", "", |_| async { Ok(Vec::new()) });
    }

    #[test]
    #[should_panic(expected = "invalid method name")]
    fn test_dotted_method_rejected_at_registration() {
        let mut r = ServiceRegistry::new();
        r.register("a", "b.c", |_| async { Ok(Vec::new()) });
    }

    #[tokio::test]
    async fn test_reregistration_replaces() {
        let mut r = ServiceRegistry::new();
        r.register("a", "b", |_| async { Ok(vec![1]) });
        r.register("a", "b", |_| async { Ok(vec![2]) });
        assert_eq!(r.dispatch("a.b", Bytes::new()).await.unwrap(), vec![2]);
    }
}
