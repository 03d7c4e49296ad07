//! Prometheus gauges fed from counter notifications

use crate::error::Result;
use crate::logging::{StructuredLogger, get_logger};
use crate::notify::{Notification, Subscription};
use prometheus::{Encoder, GaugeVec, IntGauge, Opts, Registry, TextEncoder};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

const NAMESPACE: &str = "ocea";

/// Exporter-owned registry and gauges
pub struct Metrics {
    registry: Registry,
    index: GaugeVec,
    device_index: GaugeVec,
    healthy: IntGauge,
    ready: IntGauge,
    exported: Mutex<Exported>,
}

/// Label sets currently present in the index gauges
#[derive(Default)]
struct Exported {
    index: HashSet<[String; 2]>,
    device_index: HashSet<[String; 3]>,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let index = GaugeVec::new(
            Opts::new("index", "Absolute index of a fluid")
                .namespace(NAMESPACE)
                .subsystem("metering"),
            &["fluid", "local_id"],
        )?;
        let device_index = GaugeVec::new(
            Opts::new("device_index", "Absolute index of a meter")
                .namespace(NAMESPACE)
                .subsystem("metering"),
            &["serial", "fluid", "local_id"],
        )?;
        let healthy = IntGauge::with_opts(
            Opts::new("healthy", "1 when the last fetch cycle succeeded")
                .namespace(NAMESPACE)
                .subsystem("fetcher"),
        )?;
        let ready = IntGauge::with_opts(
            Opts::new("ready", "1 once a fetch cycle has succeeded since start")
                .namespace(NAMESPACE)
                .subsystem("fetcher"),
        )?;

        registry.register(Box::new(index.clone()))?;
        registry.register(Box::new(device_index.clone()))?;
        registry.register(Box::new(healthy.clone()))?;
        registry.register(Box::new(ready.clone()))?;

        Ok(Self {
            registry,
            index,
            device_index,
            healthy,
            ready,
            exported: Mutex::new(Exported::default()),
        })
    }

    /// Replace the index gauges with the counters of `notification`.
    ///
    /// Series are updated in place; only label sets missing from the new
    /// snapshot are removed, so a concurrent scrape never sees an empty set.
    pub fn observe(&self, notification: &Notification) {
        let local_id = notification.local_id.as_str();
        let mut index = HashSet::new();
        let mut device_index = HashSet::new();

        for state in &notification.counter_states {
            self.index
                .with_label_values(&[state.fluid.as_str(), local_id])
                .set(state.absolute_index);
            index.insert([state.fluid.clone(), local_id.to_string()]);

            if !state.serial_number.is_empty() {
                self.device_index
                    .with_label_values(&[state.serial_number.as_str(), state.fluid.as_str(), local_id])
                    .set(state.absolute_index);
                device_index.insert([
                    state.serial_number.clone(),
                    state.fluid.clone(),
                    local_id.to_string(),
                ]);
            }
        }

        let mut exported = self
            .exported
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // Fluids may have changed after a rebuild
        for stale in exported.index.difference(&index) {
            let _ = self
                .index
                .remove_label_values(&[stale[0].as_str(), stale[1].as_str()]);
        }
        for stale in exported.device_index.difference(&device_index) {
            let _ = self.device_index.remove_label_values(&[
                stale[0].as_str(),
                stale[1].as_str(),
                stale[2].as_str(),
            ]);
        }
        exported.index = index;
        exported.device_index = device_index;
    }

    pub fn set_status(&self, healthy: bool, ready: bool) {
        self.healthy.set(i64::from(healthy));
        self.ready.set(i64::from(ready));
    }

    /// Text exposition of every registered metric
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| crate::error::OceaError::metrics(format!("non UTF-8 exposition: {e}")))
    }
}

/// Listener task keeping the gauges in sync with published counters
pub fn spawn_exporter(metrics: Arc<Metrics>, mut subscription: Subscription) -> JoinHandle<()> {
    let logger: StructuredLogger = get_logger("metrics");
    tokio::spawn(async move {
        while let Some(notification) = subscription.recv().await {
            metrics.observe(&notification);
            logger.debug(&format!(
                "Exported {} counter(s)",
                notification.counter_states.len()
            ));
        }
        logger.info("Notifier closed, metrics exporter stopping");
    })
}
