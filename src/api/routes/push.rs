//! Broker push delivery
//!
//! The broker treats any 2xx as an acknowledgement and anything else as a
//! request to deliver the message again, so the handler answers `204` for
//! [`Disposition::Ack`] and `503` for [`Disposition::Nack`].

use axum::{Json, extract::State, http::StatusCode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, info};

use crate::api::state::ApiState;
use crate::api::types::PushEnvelope;
use crate::broker::Delivery;
use crate::processor::Disposition;

/// POST /api/v1/push
pub async fn push_delivery(
    State(state): State<ApiState>,
    Json(envelope): Json<PushEnvelope>,
) -> StatusCode {
    let message_id = envelope.message.message_id;
    let attempt = envelope.delivery_attempt.unwrap_or(1).max(1);
    debug!(
        "push {} attempt {} from {}",
        message_id,
        attempt,
        envelope.subscription.as_deref().unwrap_or("unknown subscription")
    );
    let processor = &state.pipeline.processor;

    let payload = match STANDARD.decode(envelope.message.data.as_bytes()) {
        Ok(payload) => payload,
        Err(e) => {
            // Redelivering cannot fix the encoding
            info!("push message {} is not valid base64: {}", message_id, e);
            let health = processor.health();
            health.record_received();
            processor
                .dead_letters()
                .handle(
                    &message_id,
                    envelope.message.data.as_bytes(),
                    &format!("payload is not valid base64: {e}"),
                    attempt,
                )
                .await;
            health.record_acked();
            return StatusCode::NO_CONTENT;
        }
    };

    let delivery = Delivery {
        message_id,
        payload,
        delivery_attempt: attempt,
    };

    let outcome = processor.handle(&delivery).await;
    debug!("push {} handled: {:?}", delivery.message_id, outcome);

    match outcome.disposition() {
        Disposition::Ack => StatusCode::NO_CONTENT,
        Disposition::Nack => StatusCode::SERVICE_UNAVAILABLE,
    }
}
