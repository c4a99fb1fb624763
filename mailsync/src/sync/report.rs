//! # Sync report
//!
//! Module dedicated to the sync report.

use crate::{
    local::LocalScanReport, reconcile::SyncPlan, remote::RemoteScanReport,
    transfer::TransferReport,
};

/// The sync report.
///
/// A report is just a struct containing reports from both scans, the
/// computed plan and the transfers, if any.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// The report of the local directories scan.
    pub local: LocalScanReport,

    /// The report of the remote folder scan.
    pub remote: RemoteScanReport,

    pub plan: SyncPlan,

    /// The report of downloads, if they ran.
    pub download: Option<TransferReport>,

    /// The report of uploads, if they ran.
    pub upload: Option<TransferReport>,
}

impl SyncReport {
    /// The number of messages that exhausted their attempts.
    pub fn failures(&self) -> usize {
        [&self.download, &self.upload]
            .into_iter()
            .flatten()
            .map(|report| report.failed.len())
            .sum()
    }
}
