//! Binary-result redaction.
//!
//! Read-image-shaped results carry bulk base64 data. The stored tool
//! payload omits the base64 body; the decoded bytes live in a dedicated
//! payload referenced by a control-role attachment message parented on the
//! turn id.

use base64::Engine as _;
use serde_json::Value;

use ag_domain::{
    Message, MessageKind, Payload, PayloadKind, Role, TurnMeta,
};

/// Everything the executor persists for one redacted result.
pub struct Redaction {
    /// Structured result with `dataBase64` emptied and the omission marked.
    pub redacted: Value,
    /// Raw decoded bytes under the media-type mime.
    pub payload: Payload,
    /// Control attachment whose parent is the turn id.
    pub attachment: Message,
}

/// Attachment URI scheme pointing back at a stored payload.
pub fn payload_uri(payload_id: &str) -> String {
    format!("agently://payloads/{payload_id}")
}

/// Detect and redact bulk binary data. `None` when the result is not
/// binary-shaped or the base64 body does not decode.
pub fn redact_binary(structured: &Value, turn: &TurnMeta) -> Option<Redaction> {
    let encoded = structured.get("dataBase64")?.as_str()?;
    if encoded.is_empty() {
        return None;
    }
    let bytes = match base64::engine::general_purpose::STANDARD.decode(encoded) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "binary result has undecodable base64; storing as-is");
            return None;
        }
    };
    let media_type = structured
        .get("mediaType")
        .and_then(Value::as_str)
        .unwrap_or("application/octet-stream")
        .to_owned();

    let payload_id = uuid::Uuid::new_v4().to_string();
    let payload = Payload::inline(payload_id.clone(), PayloadKind::ModelRequest, media_type, bytes);
    let uri = payload_uri(&payload_id);

    let mut attachment = Message::new(
        uuid::Uuid::new_v4().to_string(),
        turn.conversation_id.clone(),
        turn.turn_id.clone(),
        turn.turn_id.clone(),
        Role::Control,
        MessageKind::Control,
    );
    attachment.content = uri.clone();
    attachment.attachment_payload_id = Some(payload_id);

    let mut redacted = structured.clone();
    if let Some(map) = redacted.as_object_mut() {
        map.insert("dataBase64".into(), Value::String(String::new()));
        map.insert("dataBase64Omitted".into(), Value::Bool(true));
        map.insert("attachmentUri".into(), Value::String(uri));
    }

    Some(Redaction {
        redacted,
        payload,
        attachment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn turn() -> TurnMeta {
        TurnMeta {
            turn_id: "tid".into(),
            conversation_id: "cid".into(),
            parent_message_id: "pid".into(),
            trace_id: None,
        }
    }

    #[test]
    fn image_result_is_redacted_with_attachment() {
        let bytes = b"\x89PNG fake image data";
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        let structured = json!({"dataBase64": encoded, "mediaType": "image/png", "size": bytes.len()});

        let redaction = redact_binary(&structured, &turn()).unwrap();
        assert_eq!(redaction.redacted["dataBase64"], json!(""));
        assert_eq!(redaction.redacted["dataBase64Omitted"], json!(true));
        assert_eq!(redaction.payload.mime_type, "image/png");
        assert_eq!(redaction.payload.kind, PayloadKind::ModelRequest);
        assert_eq!(redaction.payload.inline_body.as_deref(), Some(&bytes[..]));

        assert_eq!(redaction.attachment.role, Role::Control);
        assert_eq!(redaction.attachment.parent_message_id, "tid");
        assert_eq!(
            redaction.attachment.attachment_payload_id.as_deref(),
            Some(redaction.payload.id.as_str())
        );
    }

    #[test]
    fn non_binary_results_pass_through() {
        assert!(redact_binary(&json!({"content": "plain"}), &turn()).is_none());
        assert!(redact_binary(&json!({"dataBase64": ""}), &turn()).is_none());
        assert!(redact_binary(&json!({"dataBase64": "!!! not base64"}), &turn()).is_none());
    }
}
