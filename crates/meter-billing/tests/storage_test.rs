mod common;

use common::*;
use meter_billing::domain::{DeviceId, LocationId};
use meter_billing::storage::{DeviceRepository, ReadingRepository};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn test_upsert_device_replaces_price_sheet() {
    let harness = TestHarness::new().await;
    harness.add_device(device("D1", "0.05", "EUR")).await;
    harness.add_device(device("D1", "0.07", "USD")).await;

    let stored = harness
        .devices
        .get_device(&DeviceId::new("D1"))
        .await
        .expect("Failed to load device")
        .expect("device exists");
    assert_eq!(stored.bw_unit_price, "0.07");
    assert_eq!(stored.bw_currency, "USD");

    let all = harness
        .devices
        .devices_for_location(&LocationId::new(LOCATION))
        .await
        .expect("Failed to list devices");
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn test_window_readings_are_scoped_to_location_and_period() {
    let harness = TestHarness::new().await;
    harness.add_device(device("D1", "0.05", "EUR")).await;
    harness
        .add_device(meter_billing::domain::DeviceRecord {
            location_id: LocationId::new("LOC-2"),
            ..device("X1", "0.05", "EUR")
        })
        .await;

    harness.add_reading("D1", at(2023, 12, 31), 10, 0).await;
    let inside = harness.add_reading("D1", at(2024, 1, 1), 20, 0).await;
    let last_day = harness.add_reading("D1", at(2024, 1, 31), 30, 0).await;
    harness.add_reading("D1", at(2024, 2, 1), 40, 0).await;
    harness.add_reading("X1", at(2024, 1, 15), 50, 0).await;

    let window = harness
        .readings
        .window_readings(&LocationId::new(LOCATION), &january())
        .await
        .expect("Failed to load window");

    let ids: Vec<_> = window.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![inside.id, last_day.id]);
    assert!(window.iter().all(|r| !r.billed));
}

#[tokio::test]
async fn test_latest_before_picks_closest_prior_reading() {
    let harness = TestHarness::new().await;
    harness.add_device(device("D1", "0.05", "EUR")).await;

    harness.add_reading("D1", at(2023, 12, 1), 10, 0).await;
    let closest = harness.add_reading("D1", at(2023, 12, 30), 20, 0).await;
    harness.add_reading("D1", at(2024, 1, 2), 30, 0).await;

    let previous = harness
        .readings
        .latest_before(&DeviceId::new("D1"), january().starts_at())
        .await
        .expect("Failed to load baseline")
        .expect("baseline exists");
    assert_eq!(previous.id, closest.id);
    assert_eq!(previous.bw_counter, 20);
    assert_eq!(previous.recorded_at, at(2023, 12, 30));

    let none = harness
        .readings
        .latest_before(&DeviceId::new("D1"), at(2023, 11, 1))
        .await
        .expect("Failed to query baseline");
    assert!(none.is_none());
}
