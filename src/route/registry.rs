//! Route registry for dispatching invocations by route name.
//!
//! Route names and payload schemas are an implicit contract between peers;
//! the registry only enforces that a route exists and that it is invoked with
//! the cardinality it was registered under. Registration happens once during
//! peer assembly, so dispatch reads an immutable map and one route's handler
//! can never block another's registration or dispatch.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use super::RequestContext;
use crate::codec::MsgPackCodec;
use crate::error::{PeerwireError, Result};

/// Request/response shape of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// One request, one response value.
    OneToOne,
    /// One request, a stream of response values.
    OneToMany,
}

impl std::fmt::Display for Cardinality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cardinality::OneToOne => write!(f, "request/response"),
            Cardinality::OneToMany => write!(f, "request/stream"),
        }
    }
}

/// Result type for handler functions.
pub type HandlerResult = Result<()>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for route handlers operating on raw payload bytes.
pub trait Handler: Send + Sync + 'static {
    /// Handle an invocation with the raw request body.
    fn call(&self, body: Bytes, ctx: RequestContext) -> BoxFuture<'static, HandlerResult>;
}

/// Wrapper that deserializes the request body before calling the handler.
pub struct TypedHandler<F, T, Fut>
where
    F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T) -> Fut>,
}

impl<F, T, Fut> TypedHandler<F, T, Fut>
where
    F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, Fut> Handler for TypedHandler<F, T, Fut>
where
    F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, body: Bytes, ctx: RequestContext) -> BoxFuture<'static, HandlerResult> {
        let parsed: T = match MsgPackCodec::decode(&body) {
            Ok(v) => v,
            Err(e) => return Box::pin(async move { Err(e) }),
        };

        let fut = (self.handler)(parsed, ctx);
        Box::pin(fut)
    }
}

struct RouteEntry {
    handler: Box<dyn Handler>,
    cardinality: Cardinality,
}

/// Registry mapping route names to handlers.
#[derive(Default)]
pub struct RouteRegistry {
    routes: HashMap<String, RouteEntry>,
}

impl RouteRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route handler.
    ///
    /// # Errors
    ///
    /// Returns `RouteConflict` if a route with this name already exists.
    pub fn register<F, T, Fut>(
        &mut self,
        name: &str,
        cardinality: Cardinality,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        if self.routes.contains_key(name) {
            return Err(PeerwireError::RouteConflict(name.to_string()));
        }

        self.routes.insert(
            name.to_string(),
            RouteEntry {
                handler: Box::new(TypedHandler::new(handler)),
                cardinality,
            },
        );
        Ok(())
    }

    /// Get the registered cardinality of a route.
    pub fn cardinality(&self, name: &str) -> Option<Cardinality> {
        self.routes.get(name).map(|e| e.cardinality)
    }

    /// Check whether a route is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.routes.contains_key(name)
    }

    /// Dispatch an invocation to its handler.
    ///
    /// # Errors
    ///
    /// - `RouteNotFound` if no handler is registered under `name`.
    /// - `CardinalityMismatch` if the route was registered with a different
    ///   shape than it is being invoked with.
    ///
    /// Both reject only this invocation; the session and every other stream
    /// on it are unaffected.
    pub async fn dispatch(
        &self,
        name: &str,
        requested: Cardinality,
        body: Bytes,
        ctx: RequestContext,
    ) -> Result<()> {
        let entry = self
            .routes
            .get(name)
            .ok_or_else(|| PeerwireError::RouteNotFound(name.to_string()))?;

        if entry.cardinality != requested {
            return Err(PeerwireError::CardinalityMismatch(format!(
                "route {:?} is {}, invoked as {}",
                name, entry.cardinality, requested
            )));
        }

        entry.handler.call(body, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::RequestContext;

    fn detached_ctx(cardinality: Cardinality) -> RequestContext {
        RequestContext::detached(1, cardinality)
    }

    #[test]
    fn test_register_route() {
        let mut registry = RouteRegistry::new();

        registry
            .register("greetings", Cardinality::OneToMany, |_: String, _ctx| {
                async { Ok(()) }
            })
            .unwrap();

        assert!(registry.contains("greetings"));
        assert_eq!(
            registry.cardinality("greetings"),
            Some(Cardinality::OneToMany)
        );
    }

    #[test]
    fn test_duplicate_registration_conflicts() {
        let mut registry = RouteRegistry::new();

        registry
            .register("health", Cardinality::OneToMany, |_: (), _ctx| async {
                Ok(())
            })
            .unwrap();

        let result = registry.register("health", Cardinality::OneToOne, |_: (), _ctx| async {
            Ok(())
        });
        assert!(matches!(result, Err(PeerwireError::RouteConflict(_))));

        // The original registration is untouched.
        assert_eq!(registry.cardinality("health"), Some(Cardinality::OneToMany));
    }

    #[tokio::test]
    async fn test_dispatch_unknown_route() {
        let registry = RouteRegistry::new();

        let result = registry
            .dispatch(
                "nonexistent",
                Cardinality::OneToOne,
                Bytes::new(),
                detached_ctx(Cardinality::OneToOne),
            )
            .await;

        assert!(matches!(result, Err(PeerwireError::RouteNotFound(_))));
    }

    #[tokio::test]
    async fn test_dispatch_wrong_cardinality() {
        let mut registry = RouteRegistry::new();
        registry
            .register("health", Cardinality::OneToMany, |_: (), _ctx| async {
                Ok(())
            })
            .unwrap();

        let body = Bytes::from(crate::codec::MsgPackCodec::encode(&()).unwrap());
        let result = registry
            .dispatch(
                "health",
                Cardinality::OneToOne,
                body,
                detached_ctx(Cardinality::OneToOne),
            )
            .await;

        assert!(matches!(
            result,
            Err(PeerwireError::CardinalityMismatch(_))
        ));
    }

    #[tokio::test]
    async fn test_dispatch_invokes_handler() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let hit = Arc::new(AtomicBool::new(false));
        let hit_clone = hit.clone();

        let mut registry = RouteRegistry::new();
        registry
            .register("echo", Cardinality::OneToOne, move |name: String, _ctx| {
                let hit = hit_clone.clone();
                async move {
                    assert_eq!(name, "soumen");
                    hit.store(true, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();

        let body = Bytes::from(crate::codec::MsgPackCodec::encode(&"soumen").unwrap());
        registry
            .dispatch(
                "echo",
                Cardinality::OneToOne,
                body,
                detached_ctx(Cardinality::OneToOne),
            )
            .await
            .unwrap();

        assert!(hit.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_dispatch_undecodable_body() {
        let mut registry = RouteRegistry::new();
        registry
            .register("typed", Cardinality::OneToOne, |_: Vec<u32>, _ctx| async {
                Ok(())
            })
            .unwrap();

        let result = registry
            .dispatch(
                "typed",
                Cardinality::OneToOne,
                Bytes::from_static(b"\xc3"), // a bool, not an array
                detached_ctx(Cardinality::OneToOne),
            )
            .await;

        assert!(matches!(result, Err(PeerwireError::MsgPackDecode(_))));
    }
}
