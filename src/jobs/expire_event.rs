//! Expiration sweep worker: a thin scheduling wrapper over the credential
//! service's event-wide expire. The underlying operation is naturally
//! idempotent, so failures just propagate to the queue's default retry.

use crate::app_state::AppState;

use super::{JobError, Outcome};

pub async fn run(state: &AppState, event_id: i64) -> Result<Outcome, JobError> {
    let expired = state.credential_service().expire_event(event_id).await?;
    tracing::info!(event_id, expired, "expiration sweep complete");
    metrics::counter!("credentials_expired_total").increment(expired);
    Ok(Outcome::Done)
}
