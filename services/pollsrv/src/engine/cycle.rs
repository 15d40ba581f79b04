//! Acquisition cycle
//!
//! One round over the catalog: every entry is read concurrently through the
//! shared link, failures are logged and dropped, successes come back in
//! catalog order.

use futures::future::join_all;
use tracing::{debug, warn};

use super::clock::MonotonicClock;
use crate::core::catalog::RegisterCatalog;
use crate::core::types::{Batch, ReadingResult};
use crate::link::DeviceLink;

/// Run one cycle; an empty batch means every entry failed (or the catalog is empty)
pub async fn run_cycle(
    link: &DeviceLink,
    catalog: &RegisterCatalog,
    clock: &MonotonicClock,
) -> Batch {
    let reads = catalog.entries().iter().map(|entry| async move {
        let outcome = link
            .read_block(entry.address, entry.count, entry.kind)
            .await;
        (entry, outcome, clock.now())
    });

    // join_all yields in input order, not completion order
    let outcomes = join_all(reads).await;

    let mut readings = Vec::with_capacity(outcomes.len());
    let mut failed = 0usize;
    for (entry, outcome, captured_at) in outcomes {
        match outcome {
            Ok(values) => readings.push(ReadingResult {
                address: entry.address,
                kind: entry.kind,
                count: entry.count,
                values,
                timestamp: captured_at,
                name: entry.name.clone(),
            }),
            Err(e) => {
                failed += 1;
                warn!(
                    address = entry.address,
                    kind = %entry.kind,
                    "Read of {} failed: {}",
                    entry.name,
                    e
                );
            },
        }
    }

    debug!(
        "Cycle complete: {} ok, {} failed of {}",
        readings.len(),
        failed,
        catalog.len()
    );
    Batch::new(readings, clock.now())
}
