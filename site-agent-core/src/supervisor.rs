//! `AgentSupervisor`: drives every configured offering's three
//! reconciliation lanes on their configured cadence (`spec.md` §4.8).
//!
//! Grounded on the teacher's `operator/src/masks/reconcile.rs` /
//! `reservations/reconcile.rs` controller-loop shape (a `loop { tick().await;
//! sleep(period).await }` per watched resource type), generalized to one
//! task per `(offering, lane)` pair rather than one task per Kubernetes
//! controller. Graceful shutdown uses `tokio::sync::watch` rather than
//! `tokio-util::CancellationToken`, since the latter isn't attested
//! anywhere in the retrieved pack and the former is already a transitive
//! dependency of `tokio`'s `sync` feature.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use uuid::Uuid;

use crate::config::{AgentConfig, DispatchMode, OfferingConfig, PollingPeriods};
use crate::control_plane::WaldurRestClient;
use crate::events::{AgentEvent, EventBus};
use crate::processors::{MembershipProcessor, OrderProcessor, ReportProcessor};

#[cfg(feature = "metrics")]
use crate::metrics;

const LANE_ORDERS: &str = "orders";
const LANE_MEMBERSHIP: &str = "membership";
const LANE_REPORTS: &str = "reports";

/// Everything one offering's three lane tasks need, assembled once at
/// startup from its [`OfferingConfig`]. A driver is supplied by the caller
/// since it depends on `backend_type`, which the core has no registry for
/// (`spec.md` §9: driver construction from configuration is left to the
/// embedding binary).
pub struct OfferingHandle {
    pub config: OfferingConfig,
    pub order: Arc<OrderProcessor>,
    pub membership: Arc<MembershipProcessor>,
    pub report: Arc<ReportProcessor>,
}

/// Runs every offering's lanes to completion until `shutdown` fires.
/// Polling-mode offerings tick on their configured period; event-driven
/// offerings additionally react to [`AgentEvent`]s published on `bus`, with
/// the same periodic tick demoted to a coarser safety sweep.
pub struct AgentSupervisor {
    offerings: Vec<OfferingHandle>,
    periods: PollingPeriods,
    bus: Arc<dyn EventBus>,
}

impl AgentSupervisor {
    pub fn new(offerings: Vec<OfferingHandle>, periods: PollingPeriods, bus: Arc<dyn EventBus>) -> Self {
        AgentSupervisor {
            offerings,
            periods,
            bus,
        }
    }

    /// Runs every offering's lanes concurrently until `shutdown` is dropped
    /// or sends `true`. Returns once every lane task has exited.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut handles = Vec::new();
        for offering in self.offerings {
            let dispatch_mode = offering.config.dispatch_mode;
            let offering_name = offering.config.name.clone();
            let offering_uuid = offering.config.uuid;

            handles.push(tokio::spawn(run_lane(
                offering_name.clone(),
                offering_uuid,
                LANE_ORDERS,
                lane_period(dispatch_mode, self.periods.orders(), self.periods.safety_sweep()),
                shutdown.clone(),
                self.bus.subscribe(),
                {
                    let order = offering.order.clone();
                    move |event| {
                        let order = order.clone();
                        async move {
                            match event {
                                Some(AgentEvent::OrderCreated { .. }) | None => order.process_offering().await,
                                Some(_) => Ok(()),
                            }
                        }
                    }
                },
            )));

            handles.push(tokio::spawn(run_lane(
                offering_name.clone(),
                offering_uuid,
                LANE_MEMBERSHIP,
                lane_period(dispatch_mode, self.periods.membership(), self.periods.safety_sweep()),
                shutdown.clone(),
                self.bus.subscribe(),
                {
                    let membership = offering.membership.clone();
                    move |event| {
                        let membership = membership.clone();
                        async move {
                            match event {
                                Some(AgentEvent::ResourceUpdated { resource_uuid, .. }) => {
                                    membership.process_resource_by_uuid(resource_uuid).await
                                }
                                Some(AgentEvent::UserRoleChanged {
                                    username,
                                    project_uuid,
                                    granted,
                                    ..
                                }) => membership.process_user_role_changed(&username, project_uuid, granted).await,
                                Some(AgentEvent::ProjectUserSync { project_uuid, .. }) => {
                                    membership.process_project_user_sync(project_uuid).await
                                }
                                Some(AgentEvent::OrderCreated { .. }) | None => {
                                    membership.process_offering().await
                                }
                            }
                        }
                    }
                },
            )));

            handles.push(tokio::spawn(run_lane(
                offering_name,
                offering_uuid,
                LANE_REPORTS,
                // Usage reports are never event-driven (spec.md §4.8): only
                // orders and membership react to federation signals.
                self.periods.reports(),
                shutdown.clone(),
                self.bus.subscribe(),
                {
                    let report = offering.report.clone();
                    move |_event| {
                        let report = report.clone();
                        async move { report.process_offering().await }
                    }
                },
            )));
        }

        let _ = shutdown.changed().await;
        for handle in handles {
            let _ = handle.await;
        }
    }
}

fn lane_period(mode: DispatchMode, polling_period: Duration, safety_sweep: Duration) -> Duration {
    match mode {
        DispatchMode::Polling => polling_period,
        DispatchMode::EventDriven => safety_sweep,
    }
}

/// One lane task: ticks `process` on `period`, and also reacts immediately
/// to any event the offering's bus subscription delivers. The bus is shared
/// by every offering (`spec.md` §4.8: "topic-per-offering" is modeled as one
/// shared channel filtered by `offering_uuid`, since `tokio::sync::broadcast`
/// has no native topic concept) — events for other offerings are ignored
/// without triggering a cycle. Exits as soon as `shutdown` is signalled.
async fn run_lane<F, Fut>(
    offering_name: String,
    offering_uuid: Uuid,
    lane: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut events: tokio::sync::broadcast::Receiver<AgentEvent>,
    process: F,
) where
    F: Fn(Option<AgentEvent>) -> Fut,
    Fut: std::future::Future<Output = crate::error::Result<()>>,
{
    // `interval`'s first tick fires immediately; start the first tick one
    // full period out so a freshly spawned lane doesn't run a startup sweep
    // on top of whatever event triggered it.
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_once(&offering_name, lane, None, &process).await;
            }
            event = events.recv() => {
                match event {
                    Ok(event) if event.offering_uuid() == offering_uuid => {
                        run_once(&offering_name, lane, Some(event), &process).await
                    }
                    Ok(_) => {
                        // Event belongs to a different offering's topic; ignore.
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                        tracing::warn!(offering = %offering_name, lane, "lane fell behind on event bus, relying on next sweep");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        // Bus has no more senders; fall back to pure polling.
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!(offering = %offering_name, lane, "lane shutting down");
                    return;
                }
            }
        }
    }
}

async fn run_once<F, Fut>(offering_name: &str, lane: &str, event: Option<AgentEvent>, process: &F)
where
    F: Fn(Option<AgentEvent>) -> Fut,
    Fut: std::future::Future<Output = crate::error::Result<()>>,
{
    let started = Instant::now();
    let result = process(event).await;
    let succeeded = result.is_ok();
    if let Err(err) = result {
        tracing::error!(offering = %offering_name, lane, error = %err, "lane cycle failed");
    }
    #[cfg(feature = "metrics")]
    metrics::record_cycle(offering_name, lane, succeeded, started.elapsed());
    #[cfg(not(feature = "metrics"))]
    let _ = (succeeded, started);
}


/// Builds a [`WaldurRestClient`] for one offering from its configuration.
/// The `reqwest::Client` it wraps is cheap to clone and safe to share; one
/// per offering keeps connection pools from crossing tenant boundaries.
pub fn waldur_client_for(
    config: &OfferingConfig,
    agent_config: &AgentConfig,
) -> crate::error::Result<WaldurRestClient> {
    WaldurRestClient::with_user_agent(
        config.api_url.clone(),
        config.api_token.clone(),
        &agent_config.user_agent,
        agent_config.tls_verify,
    )
}
