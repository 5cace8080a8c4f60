//! Billing service client boundary
//!
//! The metering core never talks to the billing backend directly; it goes
//! through this trait so the transport (gRPC, HTTP, in-process) stays
//! outside the accounting logic.

use async_trait::async_trait;
use donbill_common::{
    BillingError, ReserveCreditsRequest, ReserveCreditsResponse, SubmitWorkflowReceiptRequest,
    SubmitWorkflowReceiptResponse,
};
use std::future::Future;
use std::time::Duration;

/// Client for the billing backend
#[async_trait]
pub trait BillingClient: Send + Sync {
    /// Reserve credits for a workflow execution
    async fn reserve_credits(
        &self,
        request: ReserveCreditsRequest,
    ) -> Result<ReserveCreditsResponse, BillingError>;

    /// Submit the final metering receipt.
    ///
    /// `Ok(None)` means the backend answered without a response body.
    async fn submit_workflow_receipt(
        &self,
        request: SubmitWorkflowReceiptRequest,
    ) -> Result<Option<SubmitWorkflowReceiptResponse>, BillingError>;
}

/// Run a billing call under an optional deadline
pub(crate) async fn with_deadline<T, F>(
    deadline: Option<Duration>,
    call: F,
) -> Result<T, BillingError>
where
    F: Future<Output = Result<T, BillingError>>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| BillingError::Timeout {
                elapsed_ms: limit.as_millis() as u64,
            })?,
        None => call.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deadline_passes_through_result() {
        let ok = with_deadline(Some(Duration::from_secs(1)), async { Ok::<_, BillingError>(7) }).await;
        assert_eq!(ok, Ok(7));

        let err = with_deadline(None, async {
            Err::<u8, _>(BillingError::Transport("down".into()))
        })
        .await;
        assert_eq!(err, Err(BillingError::Transport("down".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let result = with_deadline(Some(Duration::from_millis(50)), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, BillingError>(())
        })
        .await;
        assert_eq!(result, Err(BillingError::Timeout { elapsed_ms: 50 }));
    }
}
