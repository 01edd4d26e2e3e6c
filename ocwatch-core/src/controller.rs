//! Reconciliation loop
//!
//! Every tick the controller folds three independently changing signals
//! (the child's own reports, reachability through the tunnel, and the
//! freshest DSID) into one decision: should openconnect be running, and with
//! which DSID.

use crate::config::ControllerConfig;
use crate::dsid::{redact, CredentialSource, DsidStatus, DsidTracker};
use crate::error::SupervisorError;
use crate::vpn::health_check::HealthProbe;
use crate::vpn::process::{StopOutcome, TunnelSupervisor};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Timing knobs for the loop
#[derive(Debug, Clone, Copy)]
pub struct ControllerSettings {
    pub interval: Duration,
    /// How long health checks may keep failing before the tunnel is stopped
    pub health_check_grace_period: Duration,
}

impl From<&ControllerConfig> for ControllerSettings {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            interval: config.interval(),
            health_check_grace_period: config.health_check_grace_period(),
        }
    }
}

/// Why the controller stopped the tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The server refused the DSID in use
    CredentialRejected,
    /// openconnect detected a dead ESP peer
    PeerDead,
    /// Health checks kept failing past the grace period
    HealthCheckFailed,
    /// A newer DSID showed up
    CredentialRotated,
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub stops: Vec<(StopReason, StopOutcome)>,
    pub started: bool,
    /// Set when a start was attempted and failed
    pub start_error: Option<SupervisorError>,
}

impl TickReport {
    /// Neither stopped nor started anything
    pub fn is_idle(&self) -> bool {
        self.stops.is_empty() && !self.started && self.start_error.is_none()
    }

    pub fn stopped_for(&self, reason: StopReason) -> bool {
        self.stops.iter().any(|(r, _)| *r == reason)
    }
}

/// Drives one [`TunnelSupervisor`] from a credential source and a health probe
pub struct Controller<S, P> {
    settings: ControllerSettings,
    source: S,
    prober: P,
    supervisor: TunnelSupervisor,
    tracker: DsidTracker,
    last_healthy_connection_time: Instant,
}

impl<S: CredentialSource, P: HealthProbe> Controller<S, P> {
    pub fn new(
        settings: ControllerSettings,
        source: S,
        prober: P,
        supervisor: TunnelSupervisor,
    ) -> Self {
        Self {
            settings,
            source,
            prober,
            supervisor,
            tracker: DsidTracker::new(),
            last_healthy_connection_time: Instant::now(),
        }
    }

    pub fn supervisor(&self) -> &TunnelSupervisor {
        &self.supervisor
    }

    pub fn tracker(&self) -> &DsidTracker {
        &self.tracker
    }

    /// Run one reconciliation pass
    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        // Purge a refused DSID before anything else looks at it.
        let (dsid, rejected) = self.supervisor.dsid_status();
        if rejected {
            self.tracker.reject(&dsid);
            if self.supervisor.is_running() {
                warn!(dsid = %redact(&dsid), "DSID rejected, stopping openconnect");
                self.stop(StopReason::CredentialRejected, &mut report).await;
            }
        }

        if self.supervisor.is_running() && self.supervisor.attempt_state().needs_restart() {
            warn!(
                pid = ?self.supervisor.pid(),
                "openconnect marked itself as unhealthy, stopping"
            );
            self.stop(StopReason::PeerDead, &mut report).await;
        }

        if self.supervisor.is_running() {
            let result = self.prober.check().await;
            if result.is_success() {
                self.last_healthy_connection_time = Instant::now();
            } else if self.last_healthy_connection_time.elapsed()
                > self.settings.health_check_grace_period
            {
                warn!(
                    grace = ?self.settings.health_check_grace_period,
                    pid = ?self.supervisor.pid(),
                    error = result.error().unwrap_or("unknown"),
                    "Health checks failing past grace period, stopping openconnect"
                );
                self.stop(StopReason::HealthCheckFailed, &mut report).await;
            } else {
                debug!(
                    error = result.error().unwrap_or("unknown"),
                    "Health check failed, within grace period"
                );
            }
        }

        match self.source.get().await {
            Ok(dsid) => match self.tracker.notify(&dsid) {
                DsidStatus::Accepted => {
                    info!(dsid = %redact(&dsid), "DSID changed");
                    self.supervisor.set_dsid(self.tracker.current());
                    self.stop(StopReason::CredentialRotated, &mut report).await;
                }
                DsidStatus::Rejected => {
                    debug!(dsid = %redact(&dsid), "Ignoring previously used DSID");
                }
                DsidStatus::Active => {}
            },
            Err(e) => warn!("Error getting DSID: {}", e),
        }

        if !self.supervisor.is_running()
            && !self.tracker.current().is_empty()
            && self.tracker.current() == self.supervisor.dsid()
        {
            info!(dsid = %redact(self.supervisor.dsid()), "Starting openconnect");
            match self.supervisor.start() {
                Ok(()) => {
                    // A fresh attempt gets the full grace period to come up.
                    self.last_healthy_connection_time = Instant::now();
                    report.started = true;
                }
                Err(e) => {
                    error!("Failed to start openconnect: {}", e);
                    report.start_error = Some(e);
                }
            }
        }

        report
    }

    /// Tick until `shutdown` resolves, then stop the tunnel
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            interval = ?self.settings.interval,
            health_grace = ?self.settings.health_check_grace_period,
            "Controller started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    if !report.is_idle() {
                        debug!(?report, "Tick complete");
                    }
                }
            }
        }

        info!("Shutting down, stopping openconnect");
        self.supervisor.stop().await;
    }

    async fn stop(&mut self, reason: StopReason, report: &mut TickReport) {
        let outcome = self.supervisor.stop().await;
        report.stops.push((reason, outcome));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CredentialError;
    use crate::vpn::health_check::HealthCheckResult;
    use crate::vpn::process::SupervisorSettings;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct FixedSource(Arc<Mutex<Option<String>>>);

    impl FixedSource {
        fn set(&self, dsid: &str) {
            *self.0.lock().unwrap() = Some(dsid.to_string());
        }
    }

    impl CredentialSource for FixedSource {
        async fn get(&self) -> Result<String, CredentialError> {
            let current = self.0.lock().unwrap().clone();
            current.ok_or_else(|| {
                CredentialError::Io(std::io::Error::from(std::io::ErrorKind::NotFound))
            })
        }
    }

    #[derive(Clone)]
    struct SwitchProbe(Arc<AtomicBool>);

    impl SwitchProbe {
        fn up() -> Self {
            Self(Arc::new(AtomicBool::new(true)))
        }

        fn set(&self, reachable: bool) {
            self.0.store(reachable, Ordering::SeqCst);
        }
    }

    impl HealthProbe for SwitchProbe {
        async fn check(&self) -> HealthCheckResult {
            if self.0.load(Ordering::SeqCst) {
                HealthCheckResult::success(Duration::ZERO)
            } else {
                HealthCheckResult::failure(Duration::ZERO, "unreachable".to_string())
            }
        }
    }

    fn controller(source: FixedSource, probe: SwitchProbe) -> Controller<FixedSource, SwitchProbe> {
        let supervisor = TunnelSupervisor::new(SupervisorSettings {
            binary: "openconnect".to_string(),
            url: "https://vpn.example.com/".to_string(),
            extra_args: Vec::new(),
            verbose: false,
            dry_run: true,
            shutdown_grace_period: Duration::from_secs(1),
        });
        Controller::new(
            ControllerSettings {
                interval: Duration::from_secs(5),
                health_check_grace_period: Duration::from_secs(30),
            },
            source,
            probe,
            supervisor,
        )
    }

    #[tokio::test]
    async fn test_no_credential_means_no_start() {
        let mut controller = controller(FixedSource::default(), SwitchProbe::up());
        let report = controller.tick().await;
        assert!(report.is_idle());
        assert!(!controller.supervisor().is_running());
    }

    #[tokio::test]
    async fn test_first_dsid_starts_tunnel() {
        let source = FixedSource::default();
        let mut controller = controller(source.clone(), SwitchProbe::up());

        source.set("A");
        let report = controller.tick().await;
        assert!(report.started);
        assert!(controller.supervisor().is_running());
        assert_eq!(controller.supervisor().dsid(), "A");
        assert_eq!(controller.tracker().current(), "A");
    }

    #[tokio::test]
    async fn test_steady_state_tick_is_idle() {
        let source = FixedSource::default();
        let mut controller = controller(source.clone(), SwitchProbe::up());

        source.set("A");
        controller.tick().await;
        let report = controller.tick().await;
        assert!(report.is_idle());
        assert!(controller.supervisor().is_running());
    }

    #[tokio::test]
    async fn test_rotation_stops_then_restarts_with_new_dsid() {
        let source = FixedSource::default();
        let mut controller = controller(source.clone(), SwitchProbe::up());

        source.set("A");
        controller.tick().await;

        source.set("B");
        let report = controller.tick().await;
        assert_eq!(
            report.stops,
            vec![(StopReason::CredentialRotated, StopOutcome::Exited)]
        );
        assert!(report.started);
        assert_eq!(controller.supervisor().dsid(), "B");
        assert_eq!(controller.tracker().rejection_count("A"), 1);
    }

    #[tokio::test]
    async fn test_going_back_to_retired_dsid_is_ignored() {
        let source = FixedSource::default();
        let mut controller = controller(source.clone(), SwitchProbe::up());

        source.set("A");
        controller.tick().await;
        source.set("B");
        controller.tick().await;
        source.set("A");
        let report = controller.tick().await;

        assert!(report.is_idle());
        assert_eq!(controller.supervisor().dsid(), "B");
        assert!(controller.supervisor().is_running());
    }

    #[tokio::test]
    async fn test_rejected_cookie_waits_for_a_new_one() {
        let source = FixedSource::default();
        let mut controller = controller(source.clone(), SwitchProbe::up());

        source.set("A");
        controller.tick().await;
        controller
            .supervisor()
            .log_parser()
            .feed_stderr("Cookie was rejected by server");

        let report = controller.tick().await;
        assert!(report.stopped_for(StopReason::CredentialRejected));
        assert!(!report.started);
        assert!(!controller.supervisor().is_running());
        assert_eq!(controller.tracker().current(), "");

        // Still stuck on A: nothing happens
        let report = controller.tick().await;
        assert!(!report.started);
        assert!(!controller.supervisor().is_running());

        source.set("B");
        let report = controller.tick().await;
        assert!(report.started);
        assert_eq!(controller.supervisor().dsid(), "B");
    }

    #[tokio::test]
    async fn test_dead_peer_restarts_same_dsid() {
        let source = FixedSource::default();
        let mut controller = controller(source.clone(), SwitchProbe::up());

        source.set("A");
        controller.tick().await;
        controller
            .supervisor()
            .log_parser()
            .feed_stderr("ESP detected dead peer");

        let report = controller.tick().await;
        assert!(report.stopped_for(StopReason::PeerDead));
        assert!(report.started);
        assert_eq!(controller.supervisor().dsid(), "A");
        assert!(!controller.supervisor().attempt_state().needs_restart());
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_failure_within_grace_is_tolerated() {
        let source = FixedSource::default();
        let probe = SwitchProbe::up();
        let mut controller = controller(source.clone(), probe.clone());

        source.set("A");
        controller.tick().await;
        probe.set(false);

        tokio::time::advance(Duration::from_secs(29)).await;
        let report = controller.tick().await;
        assert!(report.is_idle());
        assert!(controller.supervisor().is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_health_failure_stops_tunnel() {
        let source = FixedSource::default();
        let probe = SwitchProbe::up();
        let mut controller = controller(source.clone(), probe.clone());

        source.set("A");
        controller.tick().await;
        probe.set(false);

        tokio::time::advance(Duration::from_secs(31)).await;
        let report = controller.tick().await;
        assert_eq!(
            report.stops,
            vec![(StopReason::HealthCheckFailed, StopOutcome::Exited)]
        );
        // Same DSID is still current, so the tunnel comes straight back
        assert!(report.started);

        // The new attempt gets its own grace period
        tokio::time::advance(Duration::from_secs(5)).await;
        let report = controller.tick().await;
        assert!(report.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_tunnel_on_shutdown() {
        let source = FixedSource::default();
        source.set("A");
        let controller = controller(source, SwitchProbe::up());

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(controller.run(async {
            let _ = rx.await;
        }));

        tokio::time::sleep(Duration::from_secs(6)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
