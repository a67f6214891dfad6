//! Expiry sweeper
//!
//! Periodically removes request messages past their TTL and one-step
//! registrations nobody claimed in time. Work is bounded per pass by the
//! batch size and split into chunks; a failed item is logged and left for
//! the next pass.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use tokio::sync::watch;

use crate::relying_party::types::{DeviceRegistration, RequestMessage};
use crate::settings::{ttl_duration, KeyCeremonySettings};
use crate::store::{DeviceRegistrationStore, Entry, EntryStore, Filter};
use crate::utils::logging::LoggingHelper;

/// Outcome of one sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: usize,
    pub failed: usize,
}

impl SweepReport {
    fn absorb(&mut self, other: SweepReport) {
        self.scanned += other.scanned;
        self.removed += other.removed;
        self.failed += other.failed;
    }
}

pub struct ExpirySweeper {
    requests: Arc<dyn EntryStore<RequestMessage>>,
    devices: Arc<dyn EntryStore<DeviceRegistration>>,
    request_ttl: chrono::Duration,
    pending_registration_ttl: chrono::Duration,
    interval: Duration,
    batch_size: usize,
    chunk_size: usize,
}

impl ExpirySweeper {
    #[must_use]
    pub fn new(
        requests: Arc<dyn EntryStore<RequestMessage>>,
        devices: Arc<dyn EntryStore<DeviceRegistration>>,
        settings: &KeyCeremonySettings,
    ) -> Self {
        Self {
            requests,
            devices,
            request_ttl: ttl_duration(settings.challenges.request_ttl_seconds),
            pending_registration_ttl: ttl_duration(
                settings.challenges.pending_registration_ttl_seconds,
            ),
            interval: Duration::from_secs(settings.sweeper.interval_seconds.max(1)),
            batch_size: settings.sweeper.batch_size,
            chunk_size: settings.sweeper.chunk_size,
        }
    }

    /// Run one pass against the clock value `now`
    pub fn sweep_once(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        report.absorb(Self::sweep_store(
            "request message",
            self.requests.as_ref(),
            &Filter::CreatedBefore(now - self.request_ttl),
            self.batch_size,
            self.chunk_size,
        ));
        report.absorb(Self::sweep_store(
            "pending device registration",
            self.devices.as_ref(),
            &DeviceRegistrationStore::pending_filter(now - self.pending_registration_ttl),
            self.batch_size,
            self.chunk_size,
        ));

        LoggingHelper::log_sweep_report(&report);
        report
    }

    fn sweep_store<E: Entry>(
        label: &str,
        store: &dyn EntryStore<E>,
        filter: &Filter,
        batch_size: usize,
        chunk_size: usize,
    ) -> SweepReport {
        let mut report = SweepReport::default();

        let chunks = match store.scan(filter, batch_size, chunk_size) {
            Ok(chunks) => chunks,
            Err(e) => {
                error!("Failed to scan for expired {label}s: {e}");
                report.failed += 1;
                return report;
            }
        };

        for chunk in chunks {
            for entry in chunk {
                report.scanned += 1;
                match store.remove(entry.id()) {
                    Ok(Some(_)) => report.removed += 1,
                    // consumed by a ceremony since the scan
                    Ok(None) => {}
                    Err(e) => {
                        warn!("Failed to remove expired {label} {}: {e}", entry.id());
                        report.failed += 1;
                    }
                }
            }
        }
        report
    }

    /// Sweep on a fixed interval until `shutdown` turns `true` or its sender is dropped
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        info!(
            "Expiry sweeper started (every {}s, batch {}, chunk {})",
            self.interval.as_secs(),
            self.batch_size,
            self.chunk_size
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once(Utc::now());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Expiry sweeper stopped");
    }
}
