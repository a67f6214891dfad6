// Centralized ceremony logging so key handles and challenges never reach the log raw
use log::{debug, info, warn};

use crate::store::encoded_key_handle_hash;
use crate::sweeper::SweepReport;

pub struct LoggingHelper;

impl LoggingHelper {
    /// Log a newly issued request message
    pub fn log_request_issued(kind: &str, rp_id: &str, request_id: &str, sub_requests: usize) {
        info!(
            "Issued {kind} request {request_id} for {rp_id} with {sub_requests} sub-request(s)"
        );
    }

    /// Log an approved registration; the key handle is logged as its index hash
    pub fn log_registration_approved(rp_id: &str, key_handle: &str, attached: bool) {
        info!(
            "Registration approved for {} (key handle hash {}, {})",
            rp_id,
            encoded_key_handle_hash(key_handle),
            if attached { "attached" } else { "pending" }
        );
    }

    pub fn log_registration_canceled(rp_id: &str) {
        info!("Registration canceled by client for {rp_id}");
    }

    pub fn log_duplicate_key_handle(rp_id: &str, key_handle: &str) {
        warn!(
            "Rejected registration for {}: key handle hash {} is already registered",
            rp_id,
            encoded_key_handle_hash(key_handle)
        );
    }

    pub fn log_authentication_approved(device_id: &str, counter: u32) {
        info!("Authentication approved for device {device_id}, counter now {counter}");
    }

    pub fn log_authentication_canceled(device_id: &str) {
        info!("Authentication canceled by client for device {device_id}");
    }

    /// Log a counter that failed to increase
    pub fn log_counter_regression(device_id: &str, stored: u32, received: u32) {
        warn!(
            "Counter regression on device {device_id}: stored {stored}, received {received}; \
             marking device compromised"
        );
    }

    pub fn log_compromised_device_rejected(device_id: &str) {
        warn!("Rejected authentication for compromised device {device_id}");
    }

    pub fn log_counter_race(device_id: &str) {
        debug!("Concurrent counter update on device {device_id}, re-reading");
    }

    /// Log a sweep pass summary
    pub fn log_sweep_report(report: &SweepReport) {
        if report.failed > 0 {
            warn!(
                "Expiry sweep scanned {}, removed {}, failed {} (retried next pass)",
                report.scanned, report.removed, report.failed
            );
        } else if report.removed > 0 {
            info!(
                "Expiry sweep scanned {}, removed {}",
                report.scanned, report.removed
            );
        } else {
            debug!("Expiry sweep found nothing to remove");
        }
    }
}
