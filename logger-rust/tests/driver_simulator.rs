//! Link driver exercised against the in-process simulated station.

use chrono::NaiveDate;

use wx_logger::error::LinkError;
use wx_logger::link_driver::LinkDriver;
use wx_simulator::{SimulatedPort, StationHandle};
use wx_types::StationFamily;

fn driver_for(family: StationFamily) -> (LinkDriver, StationHandle) {
    let (port, station) = SimulatedPort::new(family);
    (LinkDriver::with_device(Box::new(port), "sim"), station)
}

#[tokio::test]
async fn detects_station_family() {
    let (driver, _station) = driver_for(StationFamily::Monitor);
    assert!(driver.connected());
    assert_eq!(driver.detect_family().await.unwrap(), StationFamily::Monitor);
    assert_eq!(driver.family(), Some(StationFamily::Monitor));
}

#[tokio::test]
async fn detects_each_family_code() {
    for family in [
        StationFamily::WizardIII,
        StationFamily::Perception,
        StationFamily::GroWeather,
        StationFamily::Health,
    ] {
        let (driver, _station) = driver_for(family);
        assert_eq!(driver.detect_family().await.unwrap(), family);
    }
}

#[tokio::test]
async fn poll_loop_applies_calibration() {
    let (driver, station) = driver_for(StationFamily::Monitor);
    station
        .lock()
        .unwrap()
        .set_calibration(15, -20, 100, 5);

    driver.detect_family().await.unwrap();
    let cal = driver.read_calibration().await.unwrap();
    assert_eq!(cal.inside_temp, 15);
    assert_eq!(cal.outside_temp, -20);
    assert_eq!(cal.barometer, 100);
    assert_eq!(cal.outside_humidity, 5);
    assert_eq!(cal.rain_cal, 100);

    let reading = driver.poll_loop().await.unwrap();
    // Simulator defaults: inside 712, outside 584, baro 29980, hum 66.
    assert_eq!(reading.inside_temp, Some(727));
    assert_eq!(reading.outside_temp, Some(564));
    assert_eq!(reading.barometer, Some(29880));
    assert_eq!(reading.outside_humidity, Some(71));
}

#[tokio::test]
async fn loop_crc_failure_retries_and_recovers() {
    let (driver, station) = driver_for(StationFamily::Monitor);
    driver.detect_family().await.unwrap();

    station.lock().unwrap().corrupt_next_crc = 1;
    let reading = driver.poll_loop().await.unwrap();
    assert!(reading.outside_temp.is_some());

    // The corrupted attempt shows up in the CRC counter, not as a hard
    // failure.
    assert_eq!(driver.crc_error_count(), 1);
    assert_eq!(station.lock().unwrap().loop_count, 2);
}

#[tokio::test]
async fn swallowed_response_retries_and_recovers() {
    let (driver, station) = driver_for(StationFamily::Monitor);
    driver.detect_family().await.unwrap();

    // Swallow the ACK and the packet of the first attempt.
    station.lock().unwrap().drop_next_response = 2;
    let reading = driver.poll_loop().await.unwrap();
    assert!(reading.barometer.is_some());
}

#[tokio::test]
async fn exhausted_retries_surface_crc_error() {
    let (driver, station) = driver_for(StationFamily::Monitor);
    driver.detect_family().await.unwrap();

    station.lock().unwrap().corrupt_next_crc = 10;
    let err = driver.poll_loop().await.unwrap_err();
    assert!(matches!(err, LinkError::CrcMismatch));
    assert_eq!(driver.crc_error_count(), 3); // initial try + 2 retries
}

#[tokio::test]
async fn station_time_round_trips() {
    let (driver, _station) = driver_for(StationFamily::Monitor);
    driver.detect_family().await.unwrap();

    let dt = NaiveDate::from_ymd_opt(2024, 6, 1)
        .unwrap()
        .and_hms_opt(10, 30, 15)
        .unwrap();
    driver.write_station_time(dt).await.unwrap();

    let time = driver.read_station_time().await.unwrap();
    assert_eq!(time.hour, 10);
    assert_eq!(time.minute, 30);
    assert_eq!(time.second, 15);
    assert_eq!(time.day, 1);
    assert_eq!(time.month, 6);
    assert_eq!(time.year, None); // basic units carry no year nibbles
}

#[tokio::test]
async fn groweather_station_time_includes_year() {
    let (driver, _station) = driver_for(StationFamily::GroWeather);
    driver.detect_family().await.unwrap();

    let dt = NaiveDate::from_ymd_opt(2024, 3, 9)
        .unwrap()
        .and_hms_opt(23, 59, 0)
        .unwrap();
    driver.write_station_time(dt).await.unwrap();

    let time = driver.read_station_time().await.unwrap();
    assert_eq!(time.hour, 23);
    assert_eq!(time.day, 9);
    assert_eq!(time.month, 3);
    assert_eq!(time.year, Some(2024));
}

#[tokio::test]
async fn time_write_never_interleaves_with_polling() {
    let (driver, _station) = driver_for(StationFamily::Monitor);
    driver.detect_family().await.unwrap();

    let dt = NaiveDate::from_ymd_opt(2024, 6, 1)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap();

    // Both exchanges contend for the I/O lock; each must complete as a
    // whole with no bytes from the other in the middle.
    let (poll, write) = tokio::join!(driver.poll_loop(), driver.write_station_time(dt));
    poll.unwrap();
    write.unwrap();

    let time = driver.read_station_time().await.unwrap();
    assert_eq!(time.hour, 12);
}

#[tokio::test]
async fn sample_and_archive_periods() {
    let (driver, _station) = driver_for(StationFamily::Monitor);
    driver.detect_family().await.unwrap();

    // Simulator defaults: archive 30 min, sample 8 s (stored 256 - n).
    assert_eq!(driver.read_archive_period().await.unwrap(), 30);
    assert_eq!(driver.read_sample_period().await.unwrap(), 8);

    driver.set_archive_period(60).await.unwrap();
    assert_eq!(driver.read_archive_period().await.unwrap(), 60);

    driver.set_sample_period(30).await.unwrap();
    assert_eq!(driver.read_sample_period().await.unwrap(), 30);
}

#[tokio::test]
async fn out_of_range_periods_fail_fast() {
    let (driver, station) = driver_for(StationFamily::Monitor);
    driver.detect_family().await.unwrap();

    assert!(matches!(
        driver.set_archive_period(0).await.unwrap_err(),
        LinkError::InvalidRange(_)
    ));
    assert!(matches!(
        driver.set_archive_period(121).await.unwrap_err(),
        LinkError::InvalidRange(_)
    ));
    assert!(matches!(
        driver.set_sample_period(0).await.unwrap_err(),
        LinkError::InvalidRange(_)
    ));
    assert!(matches!(
        driver.set_sample_period(256).await.unwrap_err(),
        LinkError::InvalidRange(_)
    ));

    // Nothing reached the wire.
    assert_eq!(driver.read_archive_period().await.unwrap(), 30);
    let _ = station;
}

#[tokio::test]
async fn rain_yearly_reads_from_processor_memory() {
    let (driver, station) = driver_for(StationFamily::Monitor);
    driver.detect_family().await.unwrap();

    station.lock().unwrap().set_rain_yearly(250);
    assert_eq!(driver.read_rain_yearly().await.unwrap(), 250);
}

#[tokio::test]
async fn clear_rain_counters_ack() {
    let (driver, station) = driver_for(StationFamily::Monitor);
    driver.detect_family().await.unwrap();

    station.lock().unwrap().set_rain_yearly(250);
    driver.clear_rain_daily().await.unwrap();
    driver.clear_rain_yearly().await.unwrap();
    assert_eq!(driver.read_rain_yearly().await.unwrap(), 0);
}

#[tokio::test]
async fn force_archive_acks() {
    let (driver, station) = driver_for(StationFamily::Monitor);
    driver.detect_family().await.unwrap();

    driver.force_archive().await.unwrap();
    assert_eq!(station.lock().unwrap().force_archive_count, 1);
}

#[tokio::test]
async fn commands_fail_fast_when_closed() {
    let (driver, _station) = driver_for(StationFamily::Monitor);
    driver.detect_family().await.unwrap();
    driver.close().await;
    assert!(!driver.connected());

    assert!(matches!(
        driver.poll_loop().await.unwrap_err(),
        LinkError::NotConnected
    ));
    assert!(matches!(
        driver.read_rain_yearly().await.unwrap_err(),
        LinkError::NotConnected
    ));
}

#[tokio::test]
async fn cancellation_stops_retries() {
    let (driver, station) = driver_for(StationFamily::Monitor);
    driver.detect_family().await.unwrap();

    // Every response swallowed: without cancellation this would retry
    // to exhaustion; with the flag set it must bail out immediately.
    station.lock().unwrap().drop_next_response = u32::MAX;
    driver.request_stop();
    assert!(matches!(
        driver.poll_loop().await.unwrap_err(),
        LinkError::Cancelled
    ));
}

#[tokio::test]
async fn write_calibration_round_trips() {
    let (driver, _station) = driver_for(StationFamily::Monitor);
    driver.detect_family().await.unwrap();

    let mut offsets = driver.read_calibration().await.unwrap();
    offsets.inside_temp = -12;
    offsets.outside_temp = 8;
    offsets.barometer = 55;
    offsets.outside_humidity = -3;
    offsets.rain_cal = 200;
    driver.write_calibration(offsets).await.unwrap();

    // Wipe the cached copy, then re-read from the station.
    let read_back = driver.read_calibration().await.unwrap();
    assert_eq!(read_back, offsets);
}
