//! Access Controller - Main application use case
//!
//! Orchestrates the knock pipeline for a single source address:
//! deduplication, geo fencing, second factor and enforcement.
//! This is the primary interface for the inbound listeners.

use crate::application::GeoLocator;
use crate::domain::entities::{AccessDecision, EvaluationOutcome, ListenerProfile};
use crate::domain::ports::{Enforcer, SecondFactor};
use crate::domain::value_objects::AuthOutcome;
use dashmap::DashSet;
use std::net::IpAddr;
use std::sync::Arc;

/// Access controller - main application use case.
///
/// This service orchestrates the access pipeline:
/// 1. Claims the source address so concurrent knocks from it are dropped
/// 2. Checks the listener's geo rules
/// 3. Runs the second factor
/// 4. Pushes the resulting decision to the firewall
pub struct AccessController {
    locator: Arc<GeoLocator>,
    second_factor: Arc<dyn SecondFactor>,
    enforcer: Arc<dyn Enforcer>,
    in_flight: Arc<DashSet<IpAddr>>,
}

/// RAII claim on a source address.
///
/// Owned, so it can travel into the task that runs the evaluation.
/// Releases the address when dropped, on every exit path including panics.
pub struct InFlightGuard {
    set: Arc<DashSet<IpAddr>>,
    ip: IpAddr,
}

impl InFlightGuard {
    pub fn ip(&self) -> IpAddr {
        self.ip
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.remove(&self.ip);
    }
}

impl AccessController {
    /// Create a new access controller.
    pub fn new(
        locator: Arc<GeoLocator>,
        second_factor: Arc<dyn SecondFactor>,
        enforcer: Arc<dyn Enforcer>,
    ) -> Self {
        Self {
            locator,
            second_factor,
            enforcer,
            in_flight: Arc::new(DashSet::new()),
        }
    }

    /// Claim `ip` for one pipeline run.
    ///
    /// Returns `None` if another run for the same address holds the claim.
    pub fn try_claim(&self, ip: IpAddr) -> Option<InFlightGuard> {
        if self.in_flight.insert(ip) {
            Some(InFlightGuard {
                set: self.in_flight.clone(),
                ip,
            })
        } else {
            None
        }
    }

    #[cfg(test)]
    fn is_in_flight(&self, ip: &IpAddr) -> bool {
        self.in_flight.contains(ip)
    }

    /// Run the full pipeline for a knock from `ip` on `listener`.
    ///
    /// Returns immediately with [`EvaluationOutcome::Duplicate`] when the
    /// address is already being evaluated.
    pub async fn evaluate(&self, listener: &ListenerProfile, ip: IpAddr) -> EvaluationOutcome {
        match self.try_claim(ip) {
            Some(claim) => self.evaluate_claimed(listener, claim).await,
            None => {
                tracing::info!(ip = %ip, listener = %listener.name, "already being checked, skipping");
                EvaluationOutcome::Duplicate
            }
        }
    }

    /// Run the pipeline for an address claimed earlier with [`try_claim`](Self::try_claim).
    ///
    /// The claim is released when this returns. Enforcement failures are
    /// logged and do not change the outcome.
    pub async fn evaluate_claimed(&self, listener: &ListenerProfile, claim: InFlightGuard) -> EvaluationOutcome {
        let ip = claim.ip();
        tracing::debug!(ip = %ip, listener = %listener.name, "checking access rules");

        let Some(decision) = self.decide(listener, ip).await else {
            tracing::info!(ip = %ip, listener = %listener.name, "no decision, nothing enforced");
            return EvaluationOutcome::NoDecision;
        };

        if decision.is_actionable() {
            self.enforce(ip, &decision).await;
        } else {
            tracing::info!(ip = %ip, listener = %listener.name, "no address list configured for decision");
        }

        EvaluationOutcome::Decided(decision)
    }

    async fn decide(&self, listener: &ListenerProfile, ip: IpAddr) -> Option<AccessDecision> {
        if !listener.rules.is_empty() && !self.locator.within_fence(ip, &listener.rules).await {
            tracing::info!(ip = %ip, listener = %listener.name, "[DENY] not within geo rules");
            return Some(listener.deny_decision());
        }

        let Some(profile) = listener.second_factor.as_deref() else {
            if listener.rules.is_empty() {
                tracing::warn!(listener = %listener.name, "listener has neither geo rules nor second factor");
                return None;
            }
            tracing::info!(ip = %ip, listener = %listener.name, "[ALLOW] within geo rules");
            return Some(listener.allow_decision());
        };

        match self.second_factor.authenticate(&listener.name, profile, ip).await {
            AuthOutcome::Allow => {
                tracing::info!(ip = %ip, listener = %listener.name, "[ALLOW] second factor approved");
                Some(listener.allow_decision())
            }
            AuthOutcome::Deny => {
                tracing::info!(ip = %ip, listener = %listener.name, "[DENY] second factor denied");
                Some(listener.deny_decision())
            }
            AuthOutcome::Indeterminate => None,
        }
    }

    async fn enforce(&self, ip: IpAddr, decision: &AccessDecision) {
        match self
            .enforcer
            .add(ip, &decision.list_name, decision.timeout_secs)
            .await
        {
            Ok(()) => tracing::info!(
                ip = %ip,
                list = %decision.list_name,
                timeout = decision.timeout_secs,
                "address added to list"
            ),
            Err(e) => tracing::error!(
                ip = %ip,
                list = %decision.list_name,
                timeout = decision.timeout_secs,
                "failed to add address to list: {}",
                e
            ),
        }
    }
}
