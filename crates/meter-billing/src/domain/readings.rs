use crate::domain::types::{DeviceId, ReadingId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Snapshot of a device's cumulative print counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterReading {
    pub id: ReadingId,
    pub device_id: DeviceId,
    pub recorded_at: DateTime<Utc>,
    pub bw_counter: u64,
    pub color_counter: u64,
    pub billed: bool,
}

impl MeterReading {
    /// Scan order: timestamp first, insertion order breaks ties
    pub fn scan_order(&self, other: &MeterReading) -> Ordering {
        self.recorded_at
            .cmp(&other.recorded_at)
            .then_with(|| self.id.cmp(&other.id))
    }

    pub fn counter(&self, kind: CounterKind) -> u64 {
        match kind {
            CounterKind::BlackWhite => self.bw_counter,
            CounterKind::Color => self.color_counter,
        }
    }
}

/// A reading not yet stored; the store assigns its id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMeterReading {
    pub device_id: DeviceId,
    pub recorded_at: DateTime<Utc>,
    pub bw_counter: u64,
    pub color_counter: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    BlackWhite,
    Color,
}

impl fmt::Display for CounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterKind::BlackWhite => write!(f, "bw"),
            CounterKind::Color => write!(f, "color"),
        }
    }
}
