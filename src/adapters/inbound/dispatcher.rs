//! Evaluation Dispatcher
//!
//! Hands source addresses from the listeners to the access controller,
//! one task per knock, with a bound on how many run at once.

use crate::application::AccessController;
use crate::domain::entities::ListenerProfile;
use crate::infrastructure::ShutdownController;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Fire-and-forget dispatcher.
///
/// The source address is claimed before the task is spawned, so a burst
/// from one address costs a single evaluation even while every permit is
/// taken. Each accepted knock then waits for a permit before touching any
/// external service.
#[derive(Clone)]
pub struct Dispatcher {
    controller: Arc<AccessController>,
    permits: Arc<Semaphore>,
    shutdown: ShutdownController,
}

impl Dispatcher {
    /// Create a dispatcher running at most `max_concurrent` evaluations at once.
    pub fn new(
        controller: Arc<AccessController>,
        max_concurrent: usize,
        shutdown: ShutdownController,
    ) -> Self {
        Self {
            controller,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            shutdown,
        }
    }

    /// Spawn an evaluation of `ip` for `listener` and return immediately.
    ///
    /// Returns false when `ip` is already claimed by a queued or running
    /// evaluation; the knock is dropped.
    pub fn dispatch(&self, listener: Arc<ListenerProfile>, ip: IpAddr) -> bool {
        let Some(claim) = self.controller.try_claim(ip) else {
            tracing::info!(ip = %ip, listener = %listener.name, "already being checked, skipping");
            return false;
        };

        let controller = self.controller.clone();
        let permits = self.permits.clone();
        let guard = self.shutdown.evaluation_guard();

        tokio::spawn(async move {
            let _guard = guard;
            let _permit = match permits.acquire_owned().await {
                Ok(p) => p,
                Err(_) => {
                    tracing::warn!(ip = %ip, "dispatcher closed, dropping knock");
                    return;
                }
            };
            let outcome = controller.evaluate_claimed(&listener, claim).await;
            tracing::debug!(ip = %ip, listener = %listener.name, "evaluation finished: {:?}", outcome);
        });
        true
    }

    #[cfg(test)]
    fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::application::{CacheSettings, GeoLocator};
    use crate::domain::entities::{GeolocationRecord, ListTarget, RuleSet};
    use crate::domain::errors::{EnforcementError, GeoLookupError};
    use crate::domain::ports::{Enforcer, GeoProvider, LookupTarget, SecondFactor};
    use crate::domain::value_objects::{AuthOutcome, Protocol};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct NoGeo;

    #[async_trait]
    impl GeoProvider for NoGeo {
        async fn lookup(&self, _target: LookupTarget) -> Result<GeolocationRecord, GeoLookupError> {
            Err(GeoLookupError::Transport("offline".to_string()))
        }
    }

    struct SlowAllow {
        delay: Duration,
        calls: AtomicUsize,
    }

    impl SlowAllow {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SecondFactor for SlowAllow {
        async fn authenticate(&self, _listener: &str, _profile: &str, _ip: IpAddr) -> AuthOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            AuthOutcome::Allow
        }
    }

    #[derive(Default)]
    struct CountingEnforcer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Enforcer for CountingEnforcer {
        async fn add(&self, _ip: IpAddr, _list: &str, _timeout_secs: u32) -> Result<(), EnforcementError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn create_dispatcher(max: usize, enforcer: Arc<CountingEnforcer>) -> (Dispatcher, ShutdownController) {
        create_dispatcher_with(max, Arc::new(SlowAllow::new(Duration::from_millis(20))), enforcer)
    }

    fn create_dispatcher_with(
        max: usize,
        second_factor: Arc<SlowAllow>,
        enforcer: Arc<CountingEnforcer>,
    ) -> (Dispatcher, ShutdownController) {
        let locator = Arc::new(GeoLocator::new(Arc::new(NoGeo), CacheSettings::default()));
        let controller = Arc::new(AccessController::new(locator, second_factor, enforcer));
        let shutdown = ShutdownController::new();
        (Dispatcher::new(controller, max, shutdown.clone()), shutdown)
    }

    fn create_listener() -> Arc<ListenerProfile> {
        Arc::new(ListenerProfile {
            name: "ssh".to_string(),
            protocol: Protocol::Tcp,
            port: 7000,
            second_factor: Some("duo".to_string()),
            allow: ListTarget {
                name: "allow".to_string(),
                timeout_secs: 60,
            },
            deny: ListTarget {
                name: "deny".to_string(),
                timeout_secs: 60,
            },
            rules: RuleSet::default(),
        })
    }

    #[test]
    fn test_zero_bound_still_admits_one() {
        let (dispatcher, _) = create_dispatcher(0, Arc::new(CountingEnforcer::default()));
        assert_eq!(dispatcher.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_dispatched_evaluations_are_tracked_until_done() {
        let enforcer = Arc::new(CountingEnforcer::default());
        let (dispatcher, shutdown) = create_dispatcher(2, enforcer.clone());
        let listener = create_listener();

        for i in 1..=5u8 {
            assert!(dispatcher.dispatch(listener.clone(), IpAddr::from([10, 0, 0, i])));
        }
        assert_eq!(shutdown.running_evaluations(), 5);

        assert!(shutdown.wait_for_drain(Duration::from_secs(2)).await);
        assert_eq!(enforcer.calls.load(Ordering::SeqCst), 5);
        assert_eq!(dispatcher.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_same_ip_burst_runs_once_with_single_permit() {
        let second_factor = Arc::new(SlowAllow::new(Duration::from_millis(50)));
        let enforcer = Arc::new(CountingEnforcer::default());
        let (dispatcher, shutdown) = create_dispatcher_with(1, second_factor.clone(), enforcer.clone());
        let listener = create_listener();
        let ip = IpAddr::from([10, 0, 0, 1]);

        let accepted: Vec<bool> = (0..3).map(|_| dispatcher.dispatch(listener.clone(), ip)).collect();
        assert_eq!(accepted, vec![true, false, false]);

        assert!(shutdown.wait_for_drain(Duration::from_secs(2)).await);
        assert_eq!(second_factor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(enforcer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_queued_address_stays_claimed_while_waiting_for_permit() {
        let second_factor = Arc::new(SlowAllow::new(Duration::from_millis(50)));
        let enforcer = Arc::new(CountingEnforcer::default());
        let (dispatcher, shutdown) = create_dispatcher_with(1, second_factor.clone(), enforcer.clone());
        let listener = create_listener();
        let busy = IpAddr::from([10, 0, 0, 1]);
        let queued = IpAddr::from([10, 0, 0, 2]);

        assert!(dispatcher.dispatch(listener.clone(), busy));
        assert!(dispatcher.dispatch(listener.clone(), queued));
        assert!(!dispatcher.dispatch(listener.clone(), queued));
        assert!(!dispatcher.dispatch(listener.clone(), queued));

        assert!(shutdown.wait_for_drain(Duration::from_secs(2)).await);
        assert_eq!(second_factor.calls.load(Ordering::SeqCst), 2);
        assert_eq!(enforcer.calls.load(Ordering::SeqCst), 2);

        // claim released once the evaluation finished
        assert!(dispatcher.dispatch(listener, queued));
        assert!(shutdown.wait_for_drain(Duration::from_secs(2)).await);
        assert_eq!(enforcer.calls.load(Ordering::SeqCst), 3);
    }
}
