//! Device backfill
//!
//! A meter only appears in a day's snapshot once it has reported that day.
//! When today's snapshot is short, yesterday's fills the gaps. Nothing
//! older is consulted.

use crate::api::{Device, MeteringApi};
use crate::error::{OceaError, Result};
use chrono::NaiveDate;
use std::collections::HashSet;

/// Union of two snapshots keyed by device id, today's reading winning.
///
/// Fails with [`OceaError::InsufficientDevices`] unless exactly `expected`
/// devices come out.
pub fn merge_devices(today: Vec<Device>, yesterday: Vec<Device>, expected: usize) -> Result<Vec<Device>> {
    let seen: HashSet<String> = today.iter().map(|d| d.appareil_id.clone()).collect();

    let mut merged = today;
    merged.extend(
        yesterday
            .into_iter()
            .filter(|d| !seen.contains(&d.appareil_id)),
    );

    if merged.len() == expected {
        Ok(merged)
    } else {
        Err(OceaError::InsufficientDevices {
            expected,
            found: merged.len(),
        })
    }
}

/// Devices for `local_id`, completed from the day before `today` when needed
pub async fn fetch_devices(
    api: &dyn MeteringApi,
    local_id: &str,
    expected: usize,
    today: NaiveDate,
) -> Result<Vec<Device>> {
    let current = api.get_devices(local_id, today).await?;
    if current.len() >= expected {
        return Ok(current);
    }

    let previous_day = today
        .pred_opt()
        .ok_or_else(|| OceaError::consistency("no day before the statement date"))?;
    let previous = api.get_devices(local_id, previous_day).await?;
    merge_devices(current, previous, expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str, value: f64) -> Device {
        Device {
            appareil_id: id.to_string(),
            numero_compteur_appareil: format!("SN-{id}"),
            valeur_index: value,
            ..Device::default()
        }
    }

    #[test]
    fn test_today_wins_over_yesterday() {
        let today = vec![device("A", 10.5), device("B", 20.5)];
        let yesterday = vec![device("A", 10.0), device("B", 20.0), device("C", 30.0)];

        let merged = merge_devices(today, yesterday, 3).unwrap();
        assert_eq!(merged.len(), 3);
        let value = |id: &str| {
            merged
                .iter()
                .find(|d| d.appareil_id == id)
                .map(|d| d.valeur_index)
                .unwrap()
        };
        assert_eq!(value("A"), 10.5);
        assert_eq!(value("B"), 20.5);
        assert_eq!(value("C"), 30.0);
    }

    #[test]
    fn test_device_only_reported_today_is_kept() {
        let merged = merge_devices(vec![device("C", 1.0)], vec![device("A", 2.0)], 2).unwrap();
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_still_short_after_merge() {
        let err = merge_devices(vec![device("A", 1.0)], vec![device("A", 0.5)], 3).unwrap_err();
        assert!(matches!(
            err,
            OceaError::InsufficientDevices {
                expected: 3,
                found: 1
            }
        ));
    }
}
