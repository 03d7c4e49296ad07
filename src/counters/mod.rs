//! Counter reconciliation
//!
//! The portal gives a rarely refreshed absolute reading per meter (devices)
//! and a frequently refreshed year-to-date consumption per fluid
//! (dashboards). Each persisted [`CounterState`] pairs an absolute index with
//! the year-to-date value it was last aligned to, so
//!
//! ```text
//! absolute(t2) = absolute(t1) + (annual(t2) - annual(t1))
//! ```
//!
//! holds between two re-anchors. Every value is rounded to three decimals,
//! the precision the portal reports, on both sides of every comparison.
//!
//! The functions here never modify their input: a signal error leaves the
//! caller's state exactly as it was.

pub mod backfill;

use crate::api::{Dashboard, Device, Fluid};
use crate::error::{OceaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Persisted counter of one fluid
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CounterState {
    pub fluid: String,
    /// Serial of the meter backing this counter
    #[serde(default)]
    pub serial_number: String,
    pub absolute_index: f64,
    /// Year-to-date value `absolute_index` is aligned with
    #[serde(default)]
    pub annual_index: f64,
}

/// Result of a reconciliation pass
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub states: Vec<CounterState>,
    /// At least one absolute index moved
    pub updated: bool,
}

/// Round to three decimals
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Delta strategy: accumulate year-to-date progress from fresh dashboards
pub fn apply_dashboards(states: &[CounterState], dashboards: &[Dashboard]) -> Result<Reconciliation> {
    let by_fluid: HashMap<&str, &Dashboard> =
        dashboards.iter().map(|d| (d.fluide.as_str(), d)).collect();

    let mut next = Vec::with_capacity(states.len());
    let mut updated = false;

    for state in states {
        let dashboard =
            by_fluid
                .get(state.fluid.as_str())
                .ok_or_else(|| OceaError::DashboardMissing {
                    fluid: state.fluid.clone(),
                })?;

        let current = round3(dashboard.conso_cumulee_annee_courante);
        let last = round3(state.annual_index);

        if current < last {
            return Err(OceaError::YearlyCounterReset {
                fluid: state.fluid.clone(),
            });
        }

        let delta = round3(current - last);
        let mut counter = state.clone();
        if delta > 0.0 {
            counter.absolute_index = round3(state.absolute_index + delta);
            updated = true;
        }
        counter.annual_index = current;
        next.push(counter);
    }

    Ok(Reconciliation {
        states: next,
        updated,
    })
}

/// Direct strategy: take the fresh absolute readings as they are
pub fn apply_devices(states: &[CounterState], devices: &[Device]) -> Result<Reconciliation> {
    let mut next = Vec::with_capacity(states.len());
    let mut updated = false;

    for state in states {
        let device = find_device(devices, state).ok_or_else(|| OceaError::DeviceMissing {
            serial: if state.serial_number.is_empty() {
                state.fluid.clone()
            } else {
                state.serial_number.clone()
            },
        })?;

        let reading = round3(device.valeur_index);
        let mut counter = state.clone();
        if reading != round3(state.absolute_index) {
            counter.absolute_index = reading;
            updated = true;
        }
        counter.serial_number.clone_from(&device.numero_compteur_appareil);
        next.push(counter);
    }

    Ok(Reconciliation {
        states: next,
        updated,
    })
}

/// Re-align every year-to-date value on fresh dashboards, leaving the
/// absolute indexes alone.
///
/// Run after [`apply_devices`] so a later switch to the delta strategy
/// starts from the consumption already covered by the readings.
pub fn align_annual(states: &[CounterState], dashboards: &[Dashboard]) -> Result<Reconciliation> {
    let mut next = Vec::with_capacity(states.len());
    let mut updated = false;

    for state in states {
        let dashboard = dashboards
            .iter()
            .find(|d| d.fluide == state.fluid)
            .ok_or_else(|| OceaError::DashboardMissing {
                fluid: state.fluid.clone(),
            })?;

        let current = round3(dashboard.conso_cumulee_annee_courante);
        let mut counter = state.clone();
        if current != round3(state.annual_index) {
            counter.annual_index = current;
            updated = true;
        }
        next.push(counter);
    }

    Ok(Reconciliation {
        states: next,
        updated,
    })
}

fn find_device<'a>(devices: &'a [Device], state: &CounterState) -> Option<&'a Device> {
    if state.serial_number.is_empty() {
        devices.iter().find(|d| d.fluide == state.fluid)
    } else {
        devices
            .iter()
            .find(|d| d.numero_compteur_appareil == state.serial_number)
    }
}

/// Anchor every fluid on its device reading and current year-to-date value.
///
/// The only place devices and dashboards are cross-checked: one device per
/// billed fluid, each with a dashboard.
pub fn initialize_counters(
    fluids: &[Fluid],
    dashboards: &[Dashboard],
    devices: &[Device],
) -> Result<Vec<CounterState>> {
    if fluids.is_empty() {
        return Err(OceaError::consistency("no fluid billed for this unit"));
    }
    if fluids.len() != devices.len() {
        return Err(OceaError::consistency(format!(
            "the number of devices differs from the number of fluids (fluid_count={}, device_count={})",
            fluids.len(),
            devices.len()
        )));
    }

    let billed: HashSet<&str> = fluids.iter().map(|f| f.fluide.as_str()).collect();
    let dashboards: HashMap<&str, &Dashboard> =
        dashboards.iter().map(|d| (d.fluide.as_str(), d)).collect();
    let mut by_fluid: HashMap<&str, &Device> = HashMap::with_capacity(devices.len());

    for device in devices {
        if !billed.contains(device.fluide.as_str()) {
            return Err(OceaError::consistency(format!(
                "device {} refers to an unknown fluid {}",
                device.numero_compteur_appareil, device.fluide
            )));
        }
        if by_fluid.insert(device.fluide.as_str(), device).is_some() {
            return Err(OceaError::consistency(format!(
                "several devices report fluid {}",
                device.fluide
            )));
        }
    }

    fluids
        .iter()
        .map(|fluid| {
            let key = fluid.fluide.as_str();
            let device = by_fluid.get(key).ok_or_else(|| {
                OceaError::consistency(format!("no device for fluid {key}"))
            })?;
            let dashboard = dashboards.get(key).ok_or_else(|| OceaError::DashboardMissing {
                fluid: key.to_string(),
            })?;
            Ok(CounterState {
                fluid: key.to_string(),
                serial_number: device.numero_compteur_appareil.clone(),
                absolute_index: round3(device.valeur_index),
                annual_index: round3(dashboard.conso_cumulee_annee_courante),
            })
        })
        .collect()
}
