use thiserror::Error;

use crate::crypto::DecryptError;

/// Typed error hierarchy for the gateway.
///
/// Use at module boundaries (envelope decoding, command dispatch, delivery).
/// Internal/leaf functions can continue using `anyhow::Result` — the `Internal`
/// variant allows seamless conversion via the `?` operator.
///
/// Several protocol failures are deliberately *not* errors here: a bad inbound
/// signature is logged and decryption is still attempted, and a tenant-id
/// mismatch inside a decrypted payload only warns. The webhook ack never
/// depends on any of these.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("signature verification failed")]
    SignatureInvalid,

    #[error("decryption failed: {0}")]
    Decryption(#[from] DecryptError),

    #[error("malformed envelope: {0}")]
    Parse(String),

    #[error("missing required field: {0}")]
    MissingFields(&'static str),

    #[error("command handler failed: {0}")]
    Handler(String),

    #[error("message delivery failed: {0}")]
    Delivery(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_display() {
        let err = GatewayError::Parse("no Encrypt element".into());
        assert_eq!(err.to_string(), "malformed envelope: no Encrypt element");
    }

    #[test]
    fn missing_fields_display() {
        let err = GatewayError::MissingFields("FromUserName");
        assert_eq!(err.to_string(), "missing required field: FromUserName");
    }

    #[test]
    fn internal_from_anyhow() {
        let err: GatewayError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, GatewayError::Internal(_)));
    }
}
