//! Fetch orchestration
//!
//! [`CounterFetcher`] owns the persisted state. Each cycle either bootstraps
//! the account or reconciles the counters with fresh portal data, saves the
//! state when it changed and publishes a snapshot to every listener.
//! A failed cycle leaves the state untouched and is retried with backoff.

use crate::api::{Dashboard, Device, Fluid, MeteringApi};
use crate::config::{Config, PollConfig, ReconcileStrategy};
use crate::counters::{self, Reconciliation, backfill};
use crate::error::{ErrorClass, OceaError, Result};
use crate::logging::{StructuredLogger, get_logger};
use crate::metrics::Metrics;
use crate::notify::{Notification, Notifier, Subscription};
use crate::state::{AccountSnapshot, PersistedState, StateStore};
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};

/// Health of the fetch loop, observable from other tasks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetcherStatus {
    /// Last cycle succeeded
    pub healthy: bool,
    /// A cycle has succeeded since start
    pub ready: bool,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Completed cycles, successful or not
    pub cycles: u64,
    pub consecutive_failures: u32,
}

/// What a successful cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Account data fetched and counters anchored from scratch
    Bootstrapped,
    /// Yearly rollover, counters re-anchored on device readings
    Reset,
    /// At least one index moved
    Updated,
    /// Nothing changed
    Unchanged,
}

/// Delay before the attempt following the `failures`-th consecutive failure
pub fn retry_delay(base: Duration, interval: Duration, failures: u32) -> Duration {
    if failures == 0 {
        return interval;
    }
    let factor = 1u32.checked_shl(failures - 1).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(interval)
}

pub struct CounterFetcher {
    poll: PollConfig,
    api: Arc<dyn MeteringApi>,
    store: StateStore,
    state: PersistedState,
    notifier: Notifier,
    status_tx: watch::Sender<FetcherStatus>,
    metrics: Option<Arc<Metrics>>,
    logger: StructuredLogger,
}

impl CounterFetcher {
    /// Create a fetcher, loading the persisted state once
    pub fn new(config: &Config, api: Arc<dyn MeteringApi>, store: StateStore) -> Result<Self> {
        let state = store.load()?;
        let (status_tx, _) = watch::channel(FetcherStatus::default());
        Ok(Self {
            poll: config.poll.clone(),
            api,
            store,
            state,
            notifier: Notifier::new(),
            status_tx,
            metrics: None,
            logger: get_logger("fetcher"),
        })
    }

    /// Mirror health into the exporter gauges
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        metrics.set_status(false, false);
        self.metrics = Some(metrics);
        self
    }

    pub fn register_listener(&self) -> Subscription {
        self.notifier.subscribe()
    }

    pub fn status(&self) -> watch::Receiver<FetcherStatus> {
        self.status_tx.subscribe()
    }

    pub const fn state(&self) -> &PersistedState {
        &self.state
    }

    /// One bootstrap or reconciliation pass.
    ///
    /// The next state is only adopted once it is on disk, so a failed save
    /// leaves both the file and the in-memory state as they were.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        let (outcome, next) = if self.state.needs_bootstrap() {
            self.logger.info("No account data yet, bootstrapping");
            (CycleOutcome::Bootstrapped, self.bootstrap().await?)
        } else {
            match self.poll.strategy {
                ReconcileStrategy::Delta => self.reconcile_dashboards().await?,
                ReconcileStrategy::Direct => self.reconcile_devices().await?,
            }
        };

        if outcome != CycleOutcome::Unchanged {
            self.store.save(&next)?;
        }
        self.state = next;
        self.publish();
        Ok(outcome)
    }

    /// Poll forever
    pub async fn run(&mut self) {
        self.run_until(std::future::pending::<()>()).await;
    }

    /// Poll until `shutdown` completes
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        self.logger.info(&format!(
            "Starting fetch loop (interval {}s, strategy {:?})",
            self.poll.interval_secs, self.poll.strategy
        ));
        tokio::pin!(shutdown);

        let mut failures: u32 = 0;
        loop {
            let started = Instant::now();
            match self.run_cycle().await {
                Ok(outcome) => {
                    failures = 0;
                    self.record_success(outcome);
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    self.record_failure(&e, failures);
                }
            }

            let delay = retry_delay(self.poll.retry_backoff(), self.poll.interval(), failures);
            tokio::select! {
                () = sleep_until(started + delay) => {}
                () = &mut shutdown => {
                    self.logger.info("Shutdown signal received");
                    break;
                }
            }
        }
    }

    fn record_success(&self, outcome: CycleOutcome) {
        let local_id = self.local_id().to_string();
        self.logger
            .for_local(&local_id)
            .info(&format!("Fetch cycle complete: {outcome:?}"));
        self.status_tx.send_modify(|status| {
            status.healthy = true;
            status.ready = true;
            status.last_success = Some(Utc::now());
            status.last_error = None;
            status.cycles += 1;
            status.consecutive_failures = 0;
        });
        if let Some(metrics) = &self.metrics {
            metrics.set_status(true, true);
        }
    }

    fn record_failure(&self, error: &OceaError, failures: u32) {
        let message = format!("Fetch cycle failed (attempt {failures}), will retry: {error}");
        match error.class() {
            ErrorClass::Policy => self.logger.info(&message),
            ErrorClass::Transient => self.logger.warn(&message),
            ErrorClass::Auth => self
                .logger
                .error(&format!("{message}; check the portal credentials")),
            ErrorClass::Consistency | ErrorClass::Internal => self.logger.error(&message),
        }

        let mut ready = false;
        self.status_tx.send_modify(|status| {
            status.healthy = false;
            status.last_error = Some(error.to_string());
            status.cycles += 1;
            status.consecutive_failures = failures;
            ready = status.ready;
        });
        if let Some(metrics) = &self.metrics {
            metrics.set_status(false, ready);
        }
    }

    fn local_id(&self) -> &str {
        self.state
            .account_data
            .as_ref()
            .map_or("", AccountSnapshot::local_id)
    }

    fn fluids(&self) -> Vec<Fluid> {
        self.state
            .account_data
            .as_ref()
            .map(|a| a.local.fluides_restitues.clone())
            .unwrap_or_default()
    }

    fn today() -> NaiveDate {
        Local::now().date_naive()
    }

    fn publish(&self) {
        let notification = Notification {
            local_id: self.local_id().to_string(),
            counter_states: self.state.counter_states.clone(),
            published_at: Utc::now(),
        };
        let report = self.notifier.publish(&notification);
        self.logger.debug(&format!(
            "Published counters: {} delivered, {} dropped, {} pruned",
            report.delivered, report.dropped, report.pruned
        ));
    }

    async fn fetch_dashboards(&self, local_id: &str, fluids: &[Fluid]) -> Result<Vec<Dashboard>> {
        let mut dashboards = Vec::with_capacity(fluids.len());
        for fluid in fluids {
            let dashboard = self.api.get_fluid_dashboard(local_id, &fluid.fluide).await?;
            self.logger.debug(&format!("Fetched dashboard for {}", fluid.fluide));
            dashboards.push(dashboard);
        }
        Ok(dashboards)
    }

    /// Fetch the whole account and anchor every counter
    async fn bootstrap(&self) -> Result<PersistedState> {
        let resident = self.api.get_resident().await?;
        let occupation = resident
            .occupations
            .first()
            .ok_or_else(|| OceaError::consistency("no occupation found for this resident"))?;
        if resident.occupations.len() > 1 {
            self.logger.warn(&format!(
                "{} occupations found, only the first one is tracked",
                resident.occupations.len()
            ));
        }
        let local_id = occupation.logement_id.clone();
        let logger = self.logger.for_local(&local_id);
        logger.info(&format!("Found unit for resident {}", resident.resident.id));

        let mut local = self.api.get_local(&local_id).await?;
        if local.local.id.is_empty() {
            local.local.id.clone_from(&local_id);
        }
        if local.fluides_restitues.is_empty() {
            return Err(OceaError::consistency(format!(
                "no fluid found for local {local_id}"
            )));
        }
        let fluids = local.fluides_restitues.clone();

        let dashboards = self.fetch_dashboards(&local_id, &fluids).await?;
        let devices =
            backfill::fetch_devices(self.api.as_ref(), &local_id, fluids.len(), Self::today())
                .await?;
        logger.info(&format!("Fetched {} device(s)", devices.len()));

        let counter_states = counters::initialize_counters(&fluids, &dashboards, &devices)?;
        logger.info("Fetched initial state");
        Ok(PersistedState {
            counter_states,
            account_data: Some(AccountSnapshot {
                resident,
                local,
                dashboards,
                devices,
            }),
        })
    }

    /// Re-anchor after a yearly rollover
    async fn reset(&self, dashboards: Vec<Dashboard>) -> Result<PersistedState> {
        let local_id = self.local_id().to_string();
        let fluids = self.fluids();
        let devices =
            backfill::fetch_devices(self.api.as_ref(), &local_id, fluids.len(), Self::today())
                .await?;
        let counter_states = counters::initialize_counters(&fluids, &dashboards, &devices)?;

        let mut next = self.state.clone();
        next.counter_states = counter_states;
        if let Some(account) = next.account_data.as_mut() {
            account.dashboards = dashboards;
            account.devices = devices;
        }
        self.logger.for_local(&local_id).info("Counters reset");
        Ok(next)
    }

    async fn reconcile_dashboards(&self) -> Result<(CycleOutcome, PersistedState)> {
        let local_id = self.local_id().to_string();
        let fluids = self.fluids();
        let dashboards = self.fetch_dashboards(&local_id, &fluids).await?;

        match counters::apply_dashboards(&self.state.counter_states, &dashboards) {
            Ok(reconciliation) => Ok(self.adopt(reconciliation, Some(dashboards), None)),
            Err(OceaError::YearlyCounterReset { fluid }) => {
                self.logger.info(&format!(
                    "Yearly counter of {fluid} was reset, fetching absolute indexes"
                ));
                Ok((CycleOutcome::Reset, self.reset(dashboards).await?))
            }
            Err(e) if e.requires_rebuild() => self.rebuild(&e).await,
            Err(e) => Err(e),
        }
    }

    /// Follow the device readings, keeping the year-to-date values aligned
    /// with the dashboards
    async fn reconcile_devices(&self) -> Result<(CycleOutcome, PersistedState)> {
        let local_id = self.local_id().to_string();
        let expected = self.state.counter_states.len();
        let devices =
            backfill::fetch_devices(self.api.as_ref(), &local_id, expected, Self::today()).await?;
        let dashboards = self.fetch_dashboards(&local_id, &self.fluids()).await?;

        let reconciliation = counters::apply_devices(&self.state.counter_states, &devices)
            .and_then(|readings| {
                let aligned = counters::align_annual(&readings.states, &dashboards)?;
                Ok(Reconciliation {
                    states: aligned.states,
                    updated: readings.updated || aligned.updated,
                })
            });

        match reconciliation {
            Ok(reconciliation) => Ok(self.adopt(reconciliation, Some(dashboards), Some(devices))),
            Err(e) if e.requires_rebuild() => self.rebuild(&e).await,
            Err(e) => Err(e),
        }
    }

    async fn rebuild(&self, cause: &OceaError) -> Result<(CycleOutcome, PersistedState)> {
        self.logger
            .warn(&format!("{cause}; rebuilding state from scratch"));
        Ok((CycleOutcome::Bootstrapped, self.bootstrap().await?))
    }

    /// Candidate state for a reconciliation; the snapshot is refreshed only
    /// when something moved
    fn adopt(
        &self,
        reconciliation: Reconciliation,
        dashboards: Option<Vec<Dashboard>>,
        devices: Option<Vec<Device>>,
    ) -> (CycleOutcome, PersistedState) {
        let mut next = self.state.clone();
        next.counter_states = reconciliation.states;
        if !reconciliation.updated {
            return (CycleOutcome::Unchanged, next);
        }

        if let Some(account) = next.account_data.as_mut() {
            if let Some(dashboards) = dashboards {
                account.dashboards = dashboards;
            }
            if let Some(devices) = devices {
                account.devices = devices;
            }
        }
        (CycleOutcome::Updated, next)
    }
}
