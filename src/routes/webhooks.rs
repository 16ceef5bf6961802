use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{info, warn};

use crate::refresh::RefreshTrigger;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-growthbook-signature";

/// Called by the flag service whenever features change, so the shared
/// definitions update without waiting for the next timer tick.
pub async fn growthbook(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Bytes,
) -> Result<(StatusCode, &'static str), (StatusCode, &'static str)> {
    info!("received GrowthBook webhook notification");

    // No secret configured, nothing to check
    if let Some(secret) = state.webhook_secret.as_deref() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.trim().is_empty());

        let valid = match signature {
            Some(signature) => verify_signature(secret, signature, &payload),
            None => false,
        };

        if !valid {
            warn!(present = signature.is_some(), "invalid webhook signature");
            return Err((StatusCode::UNAUTHORIZED, "Invalid signature"));
        }
    }

    match state.refresher.refresh(RefreshTrigger::Webhook).await {
        Ok(()) => {
            info!("features refreshed successfully via webhook");
            Ok((StatusCode::OK, "Features refreshed"))
        }
        Err(_) => Err((StatusCode::INTERNAL_SERVER_ERROR, "Failed to refresh features")),
    }
}

/// `signature` is the hex HMAC-SHA256 of the raw payload, optionally prefixed
/// with `sha256=`. Comparison is constant time.
pub fn verify_signature(secret: &str, signature: &str, payload: &[u8]) -> bool {
    let signature = signature.trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);

    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };

    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
pub(crate) fn sign(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}
