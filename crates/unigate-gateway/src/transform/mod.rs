//! Response Transform Pipeline
//!
//! Two independently toggleable stages applied to successful tool-call
//! results, in a fixed order: redaction before compression. Compression must
//! never see un-redacted sensitive content, and redaction must see the
//! original structured payload rather than a compacted re-encoding.
//!
//! The pipeline is transparent by default: a stage whose context flag is off
//! passes the payload through untouched, and a stage failure is logged and
//! falls back to the stage's input - transforms are best-effort, never
//! correctness-critical.

pub mod encode;
pub mod redact;

use serde_json::Value;
use tracing::warn;

use unigate_core::AuthorizationContext;

/// Transform a successful tool-call result before it reaches the client.
pub fn transform_response(ctx: &AuthorizationContext, payload: Value) -> Value {
    let payload = if ctx.pii_masking_mode.masks_response() {
        redact::apply(payload, &ctx.pii_info_types)
    } else {
        payload
    };

    if ctx.compression_enabled {
        match encode::compact(&payload) {
            Ok(compacted) => compacted,
            Err(e) => {
                warn!("[Transform] Compression failed, passing payload through: {}", e);
                payload
            }
        }
    } else {
        payload
    }
}

/// Mask outbound call arguments when the context scopes masking to requests.
pub fn mask_request(ctx: &AuthorizationContext, arguments: Value) -> Value {
    redact::apply(arguments, &ctx.pii_info_types)
}
