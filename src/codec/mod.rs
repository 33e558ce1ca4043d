//! XML envelope codec: callback query parameters, inbound event
//! normalization and the encrypted reply envelope.

use quick_xml::Reader;
use quick_xml::events::Event;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::crypto::CryptoEnvelope;
use crate::errors::GatewayError;

/// Query-string parameters the platform attaches to every callback.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub msg_signature: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub nonce: String,
    /// Only present on the one-time URL verification GET.
    #[serde(default)]
    pub echostr: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Plain text message typed by the user.
    Text,
    /// Custom-menu click; content carries the menu key.
    MenuClick,
    /// Any other platform event; content carries the event key or name.
    Other,
}

/// A decrypted, normalized inbound message.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub msg_id: String,
    pub from_user: String,
    pub kind: EventKind,
    pub content: String,
}

/// Extract the text of the first `<name>` element from a flat XML document.
///
/// The platform envelopes are a single level of CDATA-or-text fields, so a
/// streaming scan beats a full deserializer here.
fn xml_field(xml: &str, name: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    let mut inside = false;
    let mut value = String::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == name.as_bytes() => {
                inside = true;
                value.clear();
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == name.as_bytes() => {
                return Some(value);
            }
            Ok(Event::Text(t)) if inside => {
                if let Ok(text) = t.unescape() {
                    value.push_str(&text);
                }
            }
            Ok(Event::CData(c)) if inside => {
                value.push_str(&String::from_utf8_lossy(&c.into_inner()));
            }
            Ok(Event::Eof) => return None,
            Err(_) => return None,
            _ => {}
        }
    }
}

/// Decode a callback POST body into an [`InboundEvent`].
///
/// A failed signature check is logged but decryption is still attempted; the
/// live platform occasionally signs with stale parameters and the payload
/// itself is authenticated by the AES key anyway.
pub fn decode_inbound(
    xml_body: &str,
    params: &CallbackParams,
    crypto: &CryptoEnvelope,
) -> Result<InboundEvent, GatewayError> {
    let cipher = xml_field(xml_body, "Encrypt")
        .ok_or_else(|| GatewayError::Parse("no Encrypt element in callback body".into()))?;

    if !crypto.verify_signature(&params.msg_signature, &params.timestamp, &params.nonce, &cipher) {
        warn!("codec: inbound signature check failed, attempting decrypt anyway");
    }

    let payload = crypto.decrypt(&cipher)?;
    let inner = payload.plain_text;

    let from_user = xml_field(&inner, "FromUserName").unwrap_or_default();
    let msg_type = xml_field(&inner, "MsgType").unwrap_or_default();
    let msg_id = xml_field(&inner, "MsgId").unwrap_or_default();

    let (kind, content) = match msg_type.as_str() {
        "text" => (
            EventKind::Text,
            xml_field(&inner, "Content").unwrap_or_default(),
        ),
        "event" => {
            let event = xml_field(&inner, "Event").unwrap_or_default();
            let event_key = xml_field(&inner, "EventKey").unwrap_or_default();
            if event.eq_ignore_ascii_case("click") {
                (EventKind::MenuClick, event_key)
            } else if event_key.is_empty() {
                (EventKind::Other, event)
            } else {
                (EventKind::Other, event_key)
            }
        }
        other => {
            debug!("codec: unhandled MsgType {:?}, falling back to Content", other);
            (
                EventKind::Other,
                xml_field(&inner, "Content").unwrap_or_default(),
            )
        }
    };

    if from_user.is_empty() {
        return Err(GatewayError::MissingFields("FromUserName"));
    }
    if content.is_empty() {
        return Err(GatewayError::MissingFields("Content"));
    }

    Ok(InboundEvent {
        msg_id,
        from_user,
        kind,
        content,
    })
}

/// URL verification: check the signature over `echostr` and return its
/// decrypted plaintext. Strict, unlike message decoding — the platform
/// requires the exact echo back.
pub fn decrypt_echo(
    params: &CallbackParams,
    crypto: &CryptoEnvelope,
) -> Result<String, GatewayError> {
    let echostr = params
        .echostr
        .as_deref()
        .ok_or(GatewayError::MissingFields("echostr"))?;
    if !crypto.verify_signature(&params.msg_signature, &params.timestamp, &params.nonce, echostr) {
        return Err(GatewayError::SignatureInvalid);
    }
    Ok(crypto.decrypt(echostr)?.plain_text)
}

/// Wrap an already-rendered reply document into the encrypted envelope the
/// platform accepts as a synchronous callback response.
pub fn encode_outbound(
    reply_xml: &str,
    timestamp: &str,
    nonce: &str,
    crypto: &CryptoEnvelope,
) -> String {
    let cipher = crypto.encrypt(reply_xml);
    let signature = crypto.compute_signature(timestamp, nonce, Some(&cipher));
    format!(
        "<xml><Encrypt><![CDATA[{cipher}]]></Encrypt>\
<MsgSignature><![CDATA[{signature}]]></MsgSignature>\
<TimeStamp>{timestamp}</TimeStamp>\
<Nonce><![CDATA[{nonce}]]></Nonce></xml>"
    )
}
