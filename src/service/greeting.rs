//! Greeting stream route.
//!
//! The `greetings` handler addresses every greeting to the authenticated
//! principal of the session, never to the name carried in the request
//! payload. While emitting, it watches the requester's own `health` route
//! over the same connection and stops as soon as an unhealthy sample
//! arrives.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::health::{HealthSample, HEALTH_ROUTE};
use crate::compose::{filter, race_cancel};
use crate::error::{PeerwireError, Result};
use crate::route::{Cardinality, RouteRegistry};
use crate::session::Subscription;

/// Route name for the greeting stream.
pub const GREETINGS_ROUTE: &str = "greetings";

/// Request payload of the `greetings` route.
///
/// The carried name is advisory only; the emitted greetings use the
/// session's authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreetingRequest {
    /// Name the requester asked to be greeted as.
    pub name: String,
}

/// One greeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreetingResponse {
    /// Greeting text, `Hello <subject> @ <RFC 3339 timestamp>`.
    pub message: String,
}

/// Produces bounded streams of timestamped greetings.
#[derive(Debug, Clone)]
pub struct GreetingService {
    interval: Duration,
    limit: usize,
}

impl Default for GreetingService {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            limit: 100,
        }
    }
}

impl GreetingService {
    /// Service emitting one greeting per `interval`, at most `limit` total.
    pub fn new(interval: Duration, limit: usize) -> Self {
        Self { interval, limit }
    }

    fn greeting_for(subject: &str) -> GreetingResponse {
        GreetingResponse {
            message: format!("Hello {} @ {}", subject, Utc::now().to_rfc3339()),
        }
    }

    /// Start a greeting stream for `subject`. Completes after the configured
    /// limit, or earlier if the subscription is cancelled or dropped.
    pub fn subscribe(&self, subject: &str) -> Subscription<GreetingResponse> {
        let (producer, subscription) = Subscription::channel();
        let service = self.clone();
        let subject = subject.to_string();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(service.interval);
            for _ in 0..service.limit {
                tokio::select! {
                    _ = producer.cancelled() => return,
                    _ = ticker.tick() => {
                        if producer.send(&Self::greeting_for(&subject)).is_err() {
                            return;
                        }
                    }
                }
            }
            producer.complete();
        });

        subscription
    }

    /// Register the `greetings` route.
    ///
    /// The handler requires an authenticated principal; without one the
    /// invocation fails with an authentication error. When the session
    /// offers a requester handle, the greeting stream is raced against the
    /// first unhealthy sample from the requester's `health` route, and
    /// cancellation of the greetings propagates to that reverse stream too.
    pub fn register(&self, registry: &mut RouteRegistry) -> Result<()> {
        let service = self.clone();
        registry.register(
            GREETINGS_ROUTE,
            Cardinality::OneToMany,
            move |request: GreetingRequest, ctx| {
                let service = service.clone();
                async move {
                    let principal = ctx.principal().cloned().ok_or_else(|| {
                        PeerwireError::Authentication(
                            "greetings requires an authenticated principal".to_string(),
                        )
                    })?;

                    if request.name != principal.username {
                        tracing::debug!(
                            requested = %request.name,
                            subject = %principal.username,
                            "greeting subject taken from principal"
                        );
                    }

                    let greetings = service.subscribe(&principal.username);
                    let gated = match ctx.requester() {
                        Some(session) => {
                            let samples: Subscription<HealthSample> =
                                session.request_stream(HEALTH_ROUTE, &()).await?;
                            let unhealthy =
                                filter(samples, |sample: &HealthSample| !sample.healthy);
                            race_cancel(greetings, unhealthy)
                        }
                        None => greetings,
                    };

                    ctx.forward(gated).await
                }
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::RequestContext;

    #[tokio::test]
    async fn test_bounded_emission_count() {
        let service = GreetingService::new(Duration::from_millis(1), 5);
        let greetings = service.subscribe("soumen").collect().await.unwrap();
        assert_eq!(greetings.len(), 5);
    }

    #[tokio::test]
    async fn test_greeting_text_and_timestamp() {
        let service = GreetingService::new(Duration::from_millis(1), 1);
        let greetings = service.subscribe("soumen").collect().await.unwrap();

        let message = &greetings[0].message;
        assert!(message.starts_with("Hello soumen @ "));

        let timestamp = message.trim_start_matches("Hello soumen @ ");
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_subscription_stops_stream() {
        let service = GreetingService::new(Duration::from_millis(1), 100);
        let mut sub = service.subscribe("soumen");

        assert!(sub.recv().await.is_some());
        drop(sub);
        // Producer observes the cancellation and stops; nothing to assert
        // beyond not hanging.
    }

    #[tokio::test]
    async fn test_handler_requires_principal() {
        let mut registry = RouteRegistry::new();
        GreetingService::default().register(&mut registry).unwrap();

        let body = crate::codec::MsgPackCodec::encode(&GreetingRequest {
            name: "anyone".to_string(),
        })
        .unwrap();

        let result = registry
            .dispatch(
                GREETINGS_ROUTE,
                Cardinality::OneToMany,
                bytes::Bytes::from(body),
                RequestContext::detached(1, Cardinality::OneToMany),
            )
            .await;

        assert!(matches!(result, Err(PeerwireError::Authentication(_))));
    }
}
