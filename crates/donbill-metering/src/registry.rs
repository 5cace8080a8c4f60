//! Registry of in-flight metering reports
//!
//! One `Reports` instance lives for the lifetime of a workflow engine and
//! holds a report per executing workflow run. `start` and `end` bracket an
//! execution; `end` always drops the report, even if the receipt could not
//! be delivered.

use crate::billing::BillingClient;
use crate::metrics::MeteringMetrics;
use crate::report::Report;
use donbill_common::{MeteringConfig, RegistryError, Result};
use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Execution id -> report, at most one per id
pub struct Reports {
    client: Option<Arc<dyn BillingClient>>,
    account_id: String,
    workflow_id: String,
    config: MeteringConfig,
    metrics: Option<Arc<MeteringMetrics>>,
    reports: RwLock<HashMap<String, Arc<Report>>>,
}

impl Reports {
    pub fn new(
        client: Option<Arc<dyn BillingClient>>,
        account_id: impl Into<String>,
        workflow_id: impl Into<String>,
        config: MeteringConfig,
    ) -> Self {
        Self {
            client,
            account_id: account_id.into(),
            workflow_id: workflow_id.into(),
            config,
            metrics: None,
            reports: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MeteringMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Open an unreserved report for an execution
    #[instrument(skip(self))]
    pub fn start(&self, workflow_execution_id: &str) -> Result<Arc<Report>> {
        let mut reports = self.reports.write();

        let entry = match reports.entry(workflow_execution_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(RegistryError::ReportExists(workflow_execution_id.to_string()).into());
            }
            Entry::Vacant(entry) => entry,
        };

        let mut report = Report::new(
            self.account_id.clone(),
            self.workflow_id.clone(),
            workflow_execution_id,
            self.client.clone(),
            self.config.clone(),
        );
        if let Some(metrics) = &self.metrics {
            report = report.with_metrics(metrics.clone());
        }

        let report = entry.insert(Arc::new(report)).clone();
        self.update_gauge(reports.len());
        debug!(active = reports.len(), "Metering report started");
        Ok(report)
    }

    pub fn get(&self, workflow_execution_id: &str) -> Option<Arc<Report>> {
        self.reports.read().get(workflow_execution_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.reports.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.read().is_empty()
    }

    /// Close an execution: drop its report and submit the receipt.
    ///
    /// The report is removed before the receipt is sent, so a failed
    /// submission never leaves it behind. The submission error, if any, is
    /// returned.
    #[instrument(skip(self))]
    pub async fn end(&self, workflow_execution_id: &str) -> Result<()> {
        let report = {
            let mut reports = self.reports.write();
            let report = reports
                .remove(workflow_execution_id)
                .ok_or_else(|| RegistryError::ReportNotFound(workflow_execution_id.to_string()))?;
            self.update_gauge(reports.len());
            report
        };

        match report.send_receipt().await {
            Ok(()) => {
                info!("Metering report closed");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Metering report closed without receipt");
                Err(e)
            }
        }
    }

    fn update_gauge(&self, active: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.active_reports.set(active as i64);
        }
    }
}

impl std::fmt::Debug for Reports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reports")
            .field("account_id", &self.account_id)
            .field("workflow_id", &self.workflow_id)
            .field("active", &self.len())
            .finish()
    }
}
