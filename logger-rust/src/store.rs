//! Embedded time-series store.
//!
//! SQLite in WAL mode so the poller can write while IPC consumers and
//! the web application read concurrently. Migrations are idempotent:
//! `CREATE TABLE IF NOT EXISTS` plus a column back-fill for databases
//! created before `rain_yearly` existed.

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use wx_types::archive::ArchiveRecord;
use wx_types::messages::{DailyExtremes, QuantityCell};
use wx_types::DerivedReading;

pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) and migrate the database at `path`.
    /// `:memory:` opens a private in-memory database for tests.
    pub async fn open(path: &str) -> Result<Self, sqlx::Error> {
        let options = if path == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        }
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

        // An in-memory database exists per connection, so it must not be
        // spread across a pool.
        let max_connections = if path == ":memory:" { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!("database ready at {path}");
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sensor_readings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                station_type INTEGER NOT NULL,
                inside_temp INTEGER,
                outside_temp INTEGER,
                inside_humidity INTEGER,
                outside_humidity INTEGER,
                wind_speed INTEGER,
                wind_direction INTEGER,
                barometer INTEGER,
                rain_total INTEGER,
                rain_rate INTEGER,
                rain_yearly INTEGER,
                solar_radiation INTEGER,
                uv_index INTEGER,
                heat_index INTEGER,
                dew_point INTEGER,
                wind_chill INTEGER,
                feels_like INTEGER,
                theta_e INTEGER,
                pressure_trend TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sensor_timestamp ON sensor_readings (timestamp)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sensor_timestamp_type \
             ON sensor_readings (timestamp, station_type)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS archive_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                downloaded_at TEXT NOT NULL,
                archive_address INTEGER NOT NULL,
                record_time TEXT NOT NULL,
                station_type INTEGER NOT NULL,
                barometer INTEGER,
                inside_humidity INTEGER,
                outside_humidity INTEGER,
                rain_in_period INTEGER,
                inside_temp_avg INTEGER,
                outside_temp_avg INTEGER,
                wind_speed_avg INTEGER,
                wind_direction INTEGER,
                outside_temp_hi INTEGER,
                wind_gust INTEGER,
                outside_temp_lo INTEGER,
                archive_interval INTEGER,
                solar_rad_avg INTEGER,
                solar_energy INTEGER,
                wind_run INTEGER,
                et INTEGER,
                degree_days INTEGER,
                uv_avg INTEGER,
                uv_dose INTEGER,
                rain_rate_hi INTEGER,
                UNIQUE (archive_address, record_time)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_archive_time ON archive_records (record_time)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS station_config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Back-fill for databases created before rain_yearly existed; the
        // ALTER fails harmlessly when the column is already present.
        if sqlx::query("SELECT rain_yearly FROM sensor_readings LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .is_err()
        {
            sqlx::query("ALTER TABLE sensor_readings ADD COLUMN rain_yearly INTEGER")
                .execute(&self.pool)
                .await?;
            debug!("migrated: added rain_yearly column");
        }

        Ok(())
    }

    // ── Sensor readings ───────────────────────────────────────────────────

    pub async fn insert_reading(&self, r: &DerivedReading) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO sensor_readings (
                timestamp, station_type,
                inside_temp, outside_temp, inside_humidity, outside_humidity,
                wind_speed, wind_direction, barometer,
                rain_total, rain_rate, rain_yearly,
                solar_radiation, uv_index,
                heat_index, dew_point, wind_chill, feels_like, theta_e,
                pressure_trend
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(r.timestamp)
        .bind(r.station_type as i64)
        .bind(r.reading.inside_temp)
        .bind(r.reading.outside_temp)
        .bind(r.reading.inside_humidity)
        .bind(r.reading.outside_humidity)
        .bind(r.reading.wind_speed)
        .bind(r.reading.wind_direction)
        .bind(r.reading.barometer)
        .bind(r.reading.rain_total)
        .bind(r.reading.rain_rate)
        .bind(r.reading.rain_yearly)
        .bind(r.reading.solar_radiation)
        .bind(r.reading.uv_index)
        .bind(r.heat_index)
        .bind(r.dew_point)
        .bind(r.wind_chill)
        .bind(r.feels_like)
        .bind(r.theta_e)
        .bind(r.pressure_trend.map(|t| t.as_str()))
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn reading_count(&self) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM sensor_readings")
            .fetch_one(&self.pool)
            .await?;
        row.try_get("n")
    }

    /// Barometer readings since `cutoff`, oldest first, for trend
    /// analysis.
    pub async fn barometer_window(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<(DateTime<Utc>, i64)>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT timestamp, barometer FROM sensor_readings \
             WHERE barometer IS NOT NULL AND timestamp >= ? \
             ORDER BY timestamp",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let ts: DateTime<Utc> = row.try_get("timestamp")?;
                let bar: i64 = row.try_get("barometer")?;
                Ok((ts, bar))
            })
            .collect()
    }

    /// Aggregate today's extremes since `midnight` in one SELECT.
    pub async fn daily_extremes(
        &self,
        midnight: DateTime<Utc>,
    ) -> Result<Option<DailyExtremes>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT
                MAX(outside_temp) AS ot_hi, MIN(outside_temp) AS ot_lo,
                MAX(inside_temp) AS it_hi, MIN(inside_temp) AS it_lo,
                MAX(wind_speed) AS ws_hi,
                MAX(barometer) AS bar_hi, MIN(barometer) AS bar_lo,
                MAX(outside_humidity) AS hum_hi, MIN(outside_humidity) AS hum_lo,
                MAX(rain_rate) AS rr_hi
            FROM sensor_readings WHERE timestamp >= ?
            "#,
        )
        .bind(midnight)
        .fetch_one(&self.pool)
        .await?;

        let ot_hi: Option<i64> = row.try_get("ot_hi")?;
        if ot_hi.is_none() {
            return Ok(None);
        }

        let cell = |raw: Option<i64>, divisor: f64, unit: &str| {
            raw.map(|v| {
                let value = if divisor == 1.0 {
                    v as f64
                } else {
                    ((v as f64 / divisor) * 100.0).round() / 100.0
                };
                QuantityCell::new(Some(value), unit)
            })
        };

        Ok(Some(DailyExtremes {
            outside_temp_hi: cell(ot_hi, 10.0, "F"),
            outside_temp_lo: cell(row.try_get("ot_lo")?, 10.0, "F"),
            inside_temp_hi: cell(row.try_get("it_hi")?, 10.0, "F"),
            inside_temp_lo: cell(row.try_get("it_lo")?, 10.0, "F"),
            wind_speed_hi: cell(row.try_get("ws_hi")?, 1.0, "mph"),
            barometer_hi: cell(row.try_get("bar_hi")?, 1000.0, "inHg"),
            barometer_lo: cell(row.try_get("bar_lo")?, 1000.0, "inHg"),
            humidity_hi: cell(row.try_get("hum_hi")?, 1.0, "%"),
            humidity_lo: cell(row.try_get("hum_lo")?, 1.0, "%"),
            rain_rate_hi: cell(row.try_get("rr_hi")?, 10.0, "in/hr"),
        }))
    }

    // ── Archive records ───────────────────────────────────────────────────

    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }

    /// Insert one archive record inside a transaction. Returns false
    /// when a record with the same (archive_address, record_time) key
    /// already exists — the duplicate is silently skipped.
    pub async fn insert_archive_record(
        tx: &mut Transaction<'static, Sqlite>,
        rec: &ArchiveRecord,
        archive_interval: Option<u8>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO archive_records (
                downloaded_at, archive_address, record_time, station_type,
                barometer, inside_humidity, outside_humidity, rain_in_period,
                inside_temp_avg, outside_temp_avg, wind_speed_avg, wind_direction,
                outside_temp_hi, wind_gust, outside_temp_lo, archive_interval,
                solar_rad_avg, solar_energy, wind_run, et, degree_days,
                uv_avg, uv_dose, rain_rate_hi
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Utc::now())
        .bind(rec.archive_address as i64)
        .bind(rec.record_time)
        .bind(rec.station_type as i64)
        .bind(rec.barometer)
        .bind(rec.inside_humidity)
        .bind(rec.outside_humidity)
        .bind(rec.rain_in_period)
        .bind(rec.inside_temp_avg)
        .bind(rec.outside_temp_avg)
        .bind(rec.wind_speed_avg)
        .bind(rec.wind_direction)
        .bind(rec.outside_temp_hi)
        .bind(rec.wind_gust)
        .bind(rec.outside_temp_lo)
        .bind(archive_interval.map(|v| v as i64))
        .bind(rec.solar_rad_avg)
        .bind(rec.solar_energy)
        .bind(rec.wind_run)
        .bind(rec.et)
        .bind(rec.degree_days)
        .bind(rec.uv_avg)
        .bind(rec.uv_dose)
        .bind(rec.rain_rate_hi)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn archive_record_exists(
        &self,
        archive_address: u16,
        record_time: NaiveDateTime,
    ) -> Result<bool, sqlx::Error> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM archive_records \
             WHERE archive_address = ? AND record_time = ?",
        )
        .bind(archive_address as i64)
        .bind(record_time)
        .fetch_one(&self.pool)
        .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n > 0)
    }

    pub async fn archive_record_count(&self) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM archive_records")
            .fetch_one(&self.pool)
            .await?;
        row.try_get("n")
    }

    // ── Configuration store ───────────────────────────────────────────────

    pub async fn get_config(&self, key: &str) -> Result<Option<String>, sqlx::Error> {
        let row = sqlx::query("SELECT value FROM station_config WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.try_get("value")).transpose()
    }

    pub async fn set_config(&self, key: &str, value: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO station_config (key, value, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT (key) DO UPDATE SET value = excluded.value, \
             updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use wx_types::messages::PressureTrend;
    use wx_types::SensorReading;

    fn reading(ts: DateTime<Utc>, outside_temp: i16, barometer: u16) -> DerivedReading {
        DerivedReading {
            timestamp: ts,
            station_type: 2,
            reading: SensorReading {
                outside_temp: Some(outside_temp),
                inside_temp: Some(700),
                barometer: Some(barometer),
                outside_humidity: Some(60),
                wind_speed: Some(5),
                ..Default::default()
            },
            heat_index: None,
            dew_point: Some(500),
            wind_chill: None,
            feels_like: Some(outside_temp),
            theta_e: Some(3200),
            pressure_trend: Some(PressureTrend::Steady),
        }
    }

    #[tokio::test]
    async fn insert_and_count_readings() {
        let store = Store::open(":memory:").await.unwrap();
        let id = store
            .insert_reading(&reading(Utc::now(), 650, 29900))
            .await
            .unwrap();
        assert!(id > 0);
        assert_eq!(store.reading_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn barometer_window_is_ordered_and_filtered() {
        let store = Store::open(":memory:").await.unwrap();
        let base = Utc::now();
        for (offset_min, bar) in [(-200i64, 29800u16), (-100, 29850), (-10, 29900)] {
            let ts = base + chrono::Duration::minutes(offset_min);
            store.insert_reading(&reading(ts, 650, bar)).await.unwrap();
        }

        let cutoff = base - chrono::Duration::hours(3);
        let window = store.barometer_window(cutoff).await.unwrap();
        assert_eq!(window.len(), 3);
        assert!(window[0].0 < window[2].0);
        assert_eq!(window[0].1, 29800);

        let cutoff = base - chrono::Duration::minutes(150);
        let window = store.barometer_window(cutoff).await.unwrap();
        assert_eq!(window.len(), 2);
    }

    #[tokio::test]
    async fn daily_extremes_aggregate() {
        let store = Store::open(":memory:").await.unwrap();
        let base = Utc::now();
        store.insert_reading(&reading(base, 650, 29900)).await.unwrap();
        store.insert_reading(&reading(base, 710, 30000)).await.unwrap();
        store.insert_reading(&reading(base, 600, 29800)).await.unwrap();

        let midnight = base - chrono::Duration::hours(1);
        let extremes = store.daily_extremes(midnight).await.unwrap().unwrap();
        assert_eq!(extremes.outside_temp_hi.unwrap().value, Some(71.0));
        assert_eq!(extremes.outside_temp_lo.unwrap().value, Some(60.0));
        assert_eq!(extremes.barometer_hi.unwrap().value, Some(30.0));
    }

    #[tokio::test]
    async fn daily_extremes_empty_is_none() {
        let store = Store::open(":memory:").await.unwrap();
        let extremes = store.daily_extremes(Utc::now()).await.unwrap();
        assert!(extremes.is_none());
    }

    fn archive_record(address: u16, minute: u32) -> ArchiveRecord {
        let record_time = NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(10, minute, 0)
            .unwrap();
        ArchiveRecord {
            archive_address: address,
            record_time,
            station_type: 2,
            barometer: Some(29950),
            inside_humidity: Some(40),
            outside_humidity: Some(70),
            rain_in_period: Some(0),
            inside_temp_avg: Some(700),
            outside_temp_avg: Some(640),
            wind_speed_avg: Some(4),
            wind_direction: Some(7),
            outside_temp_hi: Some(660),
            outside_temp_lo: Some(610),
            wind_gust: Some(11),
            solar_rad_avg: None,
            solar_energy: None,
            wind_run: None,
            et: None,
            degree_days: None,
            uv_avg: None,
            uv_dose: None,
            rain_rate_hi: None,
        }
    }

    #[tokio::test]
    async fn archive_uniqueness_on_address_and_time() {
        let store = Store::open(":memory:").await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(Store::insert_archive_record(&mut tx, &archive_record(0x100, 0), Some(30))
            .await
            .unwrap());
        // Same key: silently skipped.
        assert!(!Store::insert_archive_record(&mut tx, &archive_record(0x100, 0), Some(30))
            .await
            .unwrap());
        // Same address, different time: distinct record.
        assert!(Store::insert_archive_record(&mut tx, &archive_record(0x100, 30), Some(30))
            .await
            .unwrap());
        tx.commit().await.unwrap();

        assert_eq!(store.archive_record_count().await.unwrap(), 2);
        assert!(store
            .archive_record_exists(0x100, archive_record(0x100, 0).record_time)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn config_round_trip() {
        let store = Store::open(":memory:").await.unwrap();
        assert_eq!(store.get_config("setup_complete").await.unwrap(), None);
        store.set_config("setup_complete", "true").await.unwrap();
        assert_eq!(
            store.get_config("setup_complete").await.unwrap(),
            Some("true".to_string())
        );
        store.set_config("setup_complete", "false").await.unwrap();
        assert_eq!(
            store.get_config("setup_complete").await.unwrap(),
            Some("false".to_string())
        );
    }
}
