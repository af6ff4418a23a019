//! Archive backfill from the station's SRAM ring.
//!
//! Runs once after connect, sharing the driver's I/O lock with the
//! poller. Walks the circular buffer oldest-to-newest, decodes each
//! record, and inserts the ones the database has not seen — so no
//! weather history is lost across daemon downtime.

use anyhow::Result;
use tracing::{error, info, warn};

use wx_types::archive::iter_archive_addresses;

use crate::link_driver::LinkDriver;
use crate::store::Store;

/// Commit after this many fresh inserts.
const COMMIT_BATCH: u64 = 100;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub total: usize,
    pub inserted: u64,
    pub skipped: u64,
    pub errors: u64,
}

/// Download every archive record between the ring pointers and insert
/// the missing ones. Returns the counts; duplicates on
/// (archive_address, record_time) are silently skipped.
pub async fn sync_archive(driver: &LinkDriver, store: &Store) -> Result<SyncOutcome> {
    let family = match driver.family() {
        Some(f) => f,
        None => {
            error!("cannot sync archive: station type not detected");
            return Ok(SyncOutcome::default());
        }
    };
    let record_size = family.archive_record_size();
    info!(
        "starting archive sync for {} (record size: {record_size} bytes)",
        family.display_name()
    );

    let (new_ptr, old_ptr) = driver.read_archive_pointers().await?;
    info!("archive pointers: OldPtr=0x{old_ptr:04X} NewPtr=0x{new_ptr:04X}");

    if old_ptr == new_ptr {
        info!("archive buffer is empty, nothing to sync");
        return Ok(SyncOutcome::default());
    }

    let period = match driver.read_archive_period().await {
        Ok(minutes) => {
            info!("archive period: {minutes} minutes");
            Some(minutes)
        }
        Err(e) => {
            warn!("archive period read failed: {e}");
            None
        }
    };

    let addresses = iter_archive_addresses(old_ptr, new_ptr, record_size as u16);
    let total = addresses.len();
    info!("archive contains {total} records to check");

    let mut outcome = SyncOutcome {
        total,
        ..Default::default()
    };

    let mut tx = store.begin().await?;
    let mut uncommitted = 0u64;

    for (i, addr) in addresses.iter().copied().enumerate() {
        if i > 0 && i % 50 == 0 {
            info!(
                "archive sync progress: {i}/{total} (inserted={}, skipped={}, errors={})",
                outcome.inserted, outcome.skipped, outcome.errors
            );
        }

        let record = match driver.read_archive_record(addr).await {
            Ok(record) => record,
            Err(e) => {
                warn!("archive record at 0x{addr:04X} unreadable: {e}");
                outcome.errors += 1;
                continue;
            }
        };

        match Store::insert_archive_record(&mut tx, &record, period).await {
            Ok(true) => {
                outcome.inserted += 1;
                uncommitted += 1;
                if uncommitted >= COMMIT_BATCH {
                    tx.commit().await?;
                    tx = store.begin().await?;
                    uncommitted = 0;
                }
            }
            Ok(false) => outcome.skipped += 1,
            Err(e) => {
                error!("archive sync store failure: {e}");
                tx.rollback().await?;
                return Err(e.into());
            }
        }
    }

    tx.commit().await?;

    info!(
        "archive sync complete: {} inserted, {} skipped, {} errors, {total} total",
        outcome.inserted, outcome.skipped, outcome.errors
    );
    Ok(outcome)
}
