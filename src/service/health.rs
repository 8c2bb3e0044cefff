//! Liveness sampling route.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::route::{Cardinality, RouteRegistry};
use crate::session::Subscription;

/// Route name for the liveness sample stream.
pub const HEALTH_ROUTE: &str = "health";

/// One liveness sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSample {
    /// Whether the peer considered itself healthy at sampling time.
    pub healthy: bool,
}

/// Produces an infinite stream of nondeterministic liveness samples, one per
/// tick, until the subscriber cancels.
#[derive(Debug, Clone)]
pub struct HealthSampler {
    interval: Duration,
    unhealthy_odds: f64,
}

impl Default for HealthSampler {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            unhealthy_odds: 0.25,
        }
    }
}

impl HealthSampler {
    /// Sampler emitting one sample per `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    /// Set the probability of an individual sample being unhealthy.
    ///
    /// `0.0` always reports healthy, `1.0` always unhealthy.
    pub fn with_unhealthy_odds(mut self, odds: f64) -> Self {
        self.unhealthy_odds = odds;
        self
    }

    /// Draw one sample.
    pub fn sample(&self) -> HealthSample {
        HealthSample {
            healthy: !rand::thread_rng().gen_bool(self.unhealthy_odds),
        }
    }

    /// Start a sample stream. Runs until the subscription is cancelled or
    /// dropped.
    pub fn subscribe(&self) -> Subscription<HealthSample> {
        let (producer, subscription) = Subscription::channel();
        let sampler = self.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sampler.interval);
            loop {
                tokio::select! {
                    _ = producer.cancelled() => return,
                    _ = ticker.tick() => {
                        if producer.send(&sampler.sample()).is_err() {
                            return;
                        }
                    }
                }
            }
        });

        subscription
    }

    /// Register the `health` route.
    pub fn register(&self, registry: &mut RouteRegistry) -> Result<()> {
        let sampler = self.clone();
        registry.register(HEALTH_ROUTE, Cardinality::OneToMany, move |_: (), ctx| {
            let sampler = sampler.clone();
            async move { ctx.forward(sampler.subscribe()).await }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_samples_flow_until_cancelled() {
        let sampler = HealthSampler::new(Duration::from_millis(1));
        let mut sub = sampler.subscribe();

        for _ in 0..3 {
            assert!(sub.recv().await.unwrap().is_ok());
        }
        sub.cancel();
    }

    #[tokio::test]
    async fn test_odds_zero_always_healthy() {
        let sampler = HealthSampler::new(Duration::from_millis(1)).with_unhealthy_odds(0.0);
        for _ in 0..20 {
            assert!(sampler.sample().healthy);
        }
    }

    #[tokio::test]
    async fn test_odds_one_always_unhealthy() {
        let sampler = HealthSampler::new(Duration::from_millis(1)).with_unhealthy_odds(1.0);
        for _ in 0..20 {
            assert!(!sampler.sample().healthy);
        }
    }

    #[tokio::test]
    async fn test_route_registration() {
        let mut registry = RouteRegistry::new();
        HealthSampler::default().register(&mut registry).unwrap();

        assert_eq!(
            registry.cardinality(HEALTH_ROUTE),
            Some(Cardinality::OneToMany)
        );
    }
}
