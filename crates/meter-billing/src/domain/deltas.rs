//! Per-reading usage from cumulative counters.
//!
//! Readings of all devices are kept in one flat arena; each device gets a list
//! of arena indices sorted by scan order, and a single walk per device keeps a
//! pointer to the previous reading.

use crate::domain::readings::{CounterKind, MeterReading};
use crate::domain::types::{DeviceId, ReadingId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::warn;

/// Billable usage attributed to one candidate reading
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingDelta {
    pub reading_id: ReadingId,
    pub device_id: DeviceId,
    pub recorded_at: DateTime<Utc>,
    pub bw_usage: u64,
    pub color_usage: u64,
}

/// A counter that went backwards; the delta was excluded from billing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterAnomaly {
    pub device_id: DeviceId,
    pub reading_id: ReadingId,
    pub counter: CounterKind,
    pub previous: u64,
    pub current: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaReport {
    pub deltas: Vec<ReadingDelta>,
    pub anomalies: Vec<CounterAnomaly>,
}

struct Slot<'a> {
    reading: &'a MeterReading,
    candidate: bool,
}

/// Computes usage deltas for every unbilled reading in `window`.
///
/// `baseline` holds readings that precede the window and only serve as the
/// "previous" reading. Billed readings inside the window do the same. Color
/// usage is zero for devices missing from `color_support` or mapped to false.
pub fn compute_deltas(
    baseline: &[MeterReading],
    window: &[MeterReading],
    color_support: &HashMap<DeviceId, bool>,
) -> DeltaReport {
    let mut arena: Vec<Slot<'_>> = Vec::with_capacity(baseline.len() + window.len());
    let mut seen: HashSet<ReadingId> = HashSet::new();

    for reading in window {
        if seen.insert(reading.id) {
            arena.push(Slot {
                reading,
                candidate: !reading.billed,
            });
        }
    }
    for reading in baseline {
        if seen.insert(reading.id) {
            arena.push(Slot {
                reading,
                candidate: false,
            });
        }
    }

    let mut by_device: BTreeMap<&DeviceId, Vec<usize>> = BTreeMap::new();
    for (index, slot) in arena.iter().enumerate() {
        by_device
            .entry(&slot.reading.device_id)
            .or_default()
            .push(index);
    }

    let mut report = DeltaReport::default();

    for (device_id, mut indices) in by_device {
        indices.sort_by(|a, b| arena[*a].reading.scan_order(arena[*b].reading));
        let supports_color = color_support.get(device_id).copied().unwrap_or(false);

        let mut previous: Option<&MeterReading> = None;
        for index in indices {
            let slot = &arena[index];
            let current = slot.reading;

            if slot.candidate {
                let bw_usage = counter_usage(previous, current, CounterKind::BlackWhite, &mut report);
                let color_usage = if supports_color {
                    counter_usage(previous, current, CounterKind::Color, &mut report)
                } else {
                    0
                };

                report.deltas.push(ReadingDelta {
                    reading_id: current.id,
                    device_id: current.device_id.clone(),
                    recorded_at: current.recorded_at,
                    bw_usage,
                    color_usage,
                });
            }

            previous = Some(current);
        }
    }

    report
}

fn counter_usage(
    previous: Option<&MeterReading>,
    current: &MeterReading,
    kind: CounterKind,
    report: &mut DeltaReport,
) -> u64 {
    let before = previous.map(|p| p.counter(kind)).unwrap_or(0);
    let after = current.counter(kind);

    match after.checked_sub(before) {
        Some(usage) => usage,
        None => {
            warn!(
                device_id = %current.device_id,
                reading_id = %current.id,
                counter = %kind,
                previous = before,
                current = after,
                "Counter went backwards, excluding delta from billable usage"
            );
            report.anomalies.push(CounterAnomaly {
                device_id: current.device_id.clone(),
                reading_id: current.id,
                counter: kind,
                previous: before,
                current: after,
            });
            0
        }
    }
}
