use failsafe::{backoff, failure_policy, CircuitBreaker, Config, StateMachine};
use std::collections::HashMap;
use std::time::Duration;

use crate::errors::FetchError;
use crate::models::SourceKind;

type SourceBreaker =
    StateMachine<failure_policy::ConsecutiveFailures<backoff::Exponential>, ()>;

/// One circuit breaker per external registry.
///
/// 5 consecutive failures open the circuit; recovery is probed with an
/// exponential backoff window between 10s and 60s. While open, calls to
/// the source are rejected locally (`FetchError::CircuitOpen`) instead
/// of burning retries, proxies and rate-limit tokens on a source that is
/// down or blocking us. NotFound counts as a success and never trips the
/// breaker.
pub struct SourceCircuitBreakers {
    breakers: HashMap<SourceKind, SourceBreaker>,
}

impl SourceCircuitBreakers {
    pub fn new() -> Self {
        let breakers = SourceKind::ALL
            .iter()
            .map(|&source| (source, build_breaker()))
            .collect();
        Self { breakers }
    }

    /// Rejects fast when the source's circuit is open.
    pub fn check(&self, source: SourceKind) -> Result<(), FetchError> {
        match self.breakers.get(&source) {
            Some(breaker) if !breaker.is_call_permitted() => Err(FetchError::CircuitOpen),
            _ => Ok(()),
        }
    }

    /// Feeds one terminal outcome into the source's state machine.
    pub fn record(&self, source: SourceKind, failed: bool) {
        if let Some(breaker) = self.breakers.get(&source) {
            let _ = breaker.call(|| if failed { Err::<(), ()>(()) } else { Ok(()) });
        }
    }
}

impl Default for SourceCircuitBreakers {
    fn default() -> Self {
        Self::new()
    }
}

fn build_breaker() -> SourceBreaker {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(10), // Initial recovery probe delay
        Duration::from_secs(60), // Maximum delay
    );
    let failure_policy = failure_policy::consecutive_failures(5, backoff_strategy);
    Config::new().failure_policy(failure_policy).build()
}
