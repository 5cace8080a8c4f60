//! Shared fixtures for metering integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use donbill_common::{
    BillingError, RateCard, ReserveCreditsRequest, ReserveCreditsResponse,
    SubmitWorkflowReceiptRequest, SubmitWorkflowReceiptResponse,
};
use donbill_metering::BillingClient;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// How the fake backend answers a reservation
#[derive(Debug, Clone)]
pub enum ReserveScript {
    Respond(ReserveCreditsResponse),
    Fail(BillingError),
    Hang,
}

/// How the fake backend answers a receipt submission
#[derive(Debug, Clone)]
pub enum ReceiptScript {
    Respond(Option<SubmitWorkflowReceiptResponse>),
    Fail(BillingError),
}

/// Billing client that replays scripted answers and records what it was sent
pub struct ScriptedBillingClient {
    reserve: Mutex<ReserveScript>,
    receipt: Mutex<ReceiptScript>,
    reserve_calls: AtomicUsize,
    receipts: Mutex<Vec<SubmitWorkflowReceiptRequest>>,
}

impl ScriptedBillingClient {
    pub fn new(reserve: ReserveScript, receipt: ReceiptScript) -> Arc<Self> {
        Arc::new(Self {
            reserve: Mutex::new(reserve),
            receipt: Mutex::new(receipt),
            reserve_calls: AtomicUsize::new(0),
            receipts: Mutex::new(Vec::new()),
        })
    }

    /// Funded reservation with the given credits and rates, receipts accepted
    pub fn funded(credits: Decimal, rates: &[(&str, &str)]) -> Arc<Self> {
        Self::new(
            ReserveScript::Respond(ReserveCreditsResponse {
                success: true,
                credits,
                rates: rates.iter().map(|(unit, rate)| RateCard::new(*unit, *rate)).collect(),
            }),
            ReceiptScript::Respond(Some(SubmitWorkflowReceiptResponse { success: true })),
        )
    }

    /// Backend that cannot be reached
    pub fn unreachable() -> Arc<Self> {
        Self::new(
            ReserveScript::Fail(BillingError::Transport("connection refused".into())),
            ReceiptScript::Fail(BillingError::Transport("connection refused".into())),
        )
    }

    pub fn set_receipt(&self, script: ReceiptScript) {
        *self.receipt.lock() = script;
    }

    pub fn reserve_calls(&self) -> usize {
        self.reserve_calls.load(Ordering::SeqCst)
    }

    pub fn receipts(&self) -> Vec<SubmitWorkflowReceiptRequest> {
        self.receipts.lock().clone()
    }
}

#[async_trait]
impl BillingClient for ScriptedBillingClient {
    async fn reserve_credits(
        &self,
        _request: ReserveCreditsRequest,
    ) -> Result<ReserveCreditsResponse, BillingError> {
        self.reserve_calls.fetch_add(1, Ordering::SeqCst);
        let script = self.reserve.lock().clone();
        match script {
            ReserveScript::Respond(response) => Ok(response),
            ReserveScript::Fail(err) => Err(err),
            ReserveScript::Hang => std::future::pending().await,
        }
    }

    async fn submit_workflow_receipt(
        &self,
        request: SubmitWorkflowReceiptRequest,
    ) -> Result<Option<SubmitWorkflowReceiptResponse>, BillingError> {
        self.receipts.lock().push(request);
        let script = self.receipt.lock().clone();
        match script {
            ReceiptScript::Respond(response) => Ok(response),
            ReceiptScript::Fail(err) => Err(err),
        }
    }
}

/// Install a test log writer once per binary
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
