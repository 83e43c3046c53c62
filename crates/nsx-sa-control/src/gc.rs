//! Garbage collection and periodic validation.
//!
//! Each pass compares the CR UIDs owning objects in the local stores against
//! the live `NSXServiceAccount` list and deletes realizations whose CR is
//! gone. Every `validation_multiplier` passes it also validates realized
//! CRs: CA bundle sync and certificate rotation. The very first pass of a
//! process syncs the CA bundle only.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::service::TrustProvisioningService;
use crate::types::GcConfig;
use crate::Result;

/// Kind of validation a pass ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// CA bundle sync only.
    CaOnly,
    /// CA bundle sync and certificate rotation.
    Full,
}

/// Counters kept across passes.
#[derive(Debug, Default)]
pub struct GcStats {
    runs: AtomicU64,
    delete_success: AtomicU64,
    delete_failed: AtomicU64,
    rotations: AtomicU64,
}

impl GcStats {
    /// Completed passes.
    #[must_use]
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    /// Stale realizations deleted.
    #[must_use]
    pub fn delete_success(&self) -> u64 {
        self.delete_success.load(Ordering::Relaxed)
    }

    /// Stale realizations that failed to delete.
    #[must_use]
    pub fn delete_failed(&self) -> u64 {
        self.delete_failed.load(Ordering::Relaxed)
    }

    /// Certificates rotated.
    #[must_use]
    pub fn rotations(&self) -> u64 {
        self.rotations.load(Ordering::Relaxed)
    }
}

/// Outcome of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    /// UIDs whose objects were deleted.
    pub deleted: Vec<String>,
    /// UIDs whose delete failed; retried next pass.
    pub failed: Vec<String>,
    /// Validation run in this pass, if any.
    pub validation: Option<ValidationMode>,
}

/// Periodic garbage collector and validator.
pub struct GarbageCollector {
    service: Arc<TrustProvisioningService>,
    config: GcConfig,
    stats: GcStats,
    bootstrapped: AtomicBool,
    passes_since_validation: AtomicU32,
}

impl GarbageCollector {
    /// Create a collector over `service`.
    #[must_use]
    pub fn new(service: Arc<TrustProvisioningService>, config: GcConfig) -> Self {
        Self {
            service,
            config,
            stats: GcStats::default(),
            bootstrapped: AtomicBool::new(false),
            passes_since_validation: AtomicU32::new(0),
        }
    }

    /// Counters kept across passes.
    #[must_use]
    pub const fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// Run one pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the CR list cannot be read; nothing is deleted
    /// in that case. Individual delete and validation failures are counted
    /// and logged instead.
    pub async fn run_once(&self) -> Result<GcReport> {
        // Snapshot before listing: a CR realized after the snapshot is never
        // a candidate, even if the list misses it.
        let realized = self.service.realized_uids();
        let accounts = self.service.kube().list_service_accounts().await?;
        let live: HashSet<String> = accounts.iter().filter_map(|cr| cr.uid()).collect();

        let mut report = GcReport::default();
        let mut stale: Vec<String> = realized
            .difference(&live)
            .cloned()
            .collect();
        stale.sort();

        for uid in stale {
            let owner = self.service.name_by_uid(&uid);
            match self.service.delete_by_uid(&uid).await {
                Ok(()) => {
                    info!(uid = %uid, owner = ?owner, "Deleted realization of removed CR");
                    self.stats.delete_success.fetch_add(1, Ordering::Relaxed);
                    report.deleted.push(uid);
                }
                Err(e) => {
                    warn!(
                        uid = %uid,
                        owner = ?owner,
                        error = %e,
                        "Failed to delete stale realization"
                    );
                    self.stats.delete_failed.fetch_add(1, Ordering::Relaxed);
                    report.failed.push(uid);
                }
            }
        }

        report.validation = self.next_validation();
        if let Some(mode) = report.validation {
            debug!(mode = ?mode, "Validating realized service accounts");
            let ca_only = mode == ValidationMode::CaOnly;
            for cr in accounts.iter().filter(|cr| cr.is_realized()) {
                match self.service.validate(cr, ca_only).await {
                    Ok(outcome) if outcome.rotated => {
                        self.stats.rotations.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(_) => {}
                    Err(e) => warn!(
                        namespace = %cr.namespace().unwrap_or_default(),
                        name = %cr.name_any(),
                        error = %e,
                        "Validation failed"
                    ),
                }
            }
        }

        self.stats.runs.fetch_add(1, Ordering::Relaxed);
        Ok(report)
    }

    /// Run passes every configured interval until `token` is cancelled.
    ///
    /// The first pass runs immediately.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            interval_seconds = self.config.interval_seconds,
            validation_multiplier = self.config.validation_multiplier,
            "Garbage collector started"
        );

        loop {
            tokio::select! {
                () = token.cancelled() => {
                    info!("Garbage collector stopped");
                    break;
                }
                _ = interval.tick() => {
                    match self.run_once().await {
                        Ok(report) => debug!(
                            deleted = report.deleted.len(),
                            failed = report.failed.len(),
                            "Garbage collection pass finished"
                        ),
                        Err(e) => warn!(error = %e, "Garbage collection pass aborted"),
                    }
                }
            }
        }
    }

    fn next_validation(&self) -> Option<ValidationMode> {
        if !self.bootstrapped.swap(true, Ordering::Relaxed) {
            return Some(ValidationMode::CaOnly);
        }

        let passes = self.passes_since_validation.fetch_add(1, Ordering::Relaxed) + 1;
        if passes >= self.config.validation_multiplier {
            self.passes_since_validation.store(0, Ordering::Relaxed);
            Some(ValidationMode::Full)
        } else {
            None
        }
    }
}
