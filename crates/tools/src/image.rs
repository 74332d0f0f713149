//! Built-in image reader returning base64 bytes with their media type.
//! The executor redacts the base64 body before the payload is stored.

use base64::Engine as _;
use serde_json::{json, Value};

use ag_domain::tool::ToolOutcome;
use ag_domain::{Error, ExecContext, Result};

use crate::Tool;

pub struct ReadImageTool;

fn media_type(path: &str) -> Option<&'static str> {
    let ext = path.rsplit('.').next()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        "tiff" | "tif" => Some("image/tiff"),
        _ => None,
    }
}

#[async_trait::async_trait]
impl Tool for ReadImageTool {
    fn name(&self) -> &str {
        "image.read"
    }

    fn description(&self) -> &str {
        "Read an image file and return it as base64 for visual analysis. \
         Supports png, jpg, jpeg, gif, webp, bmp, tiff."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path to the image file" }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn output_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "dataBase64": { "type": "string" },
                "mediaType": { "type": "string" },
                "size": { "type": "integer" }
            }
        }))
    }

    async fn execute(&self, ctx: &ExecContext, args: &Value) -> Result<ToolOutcome> {
        ctx.check()?;
        let path = args
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation("missing required parameter 'path'"))?;
        let media_type = media_type(path).ok_or_else(|| {
            Error::validation(format!("file does not appear to be an image: {path}"))
        })?;

        let bytes = tokio::fs::read(path).await?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
        let structured = json!({
            "dataBase64": encoded,
            "mediaType": media_type,
            "size": bytes.len(),
        });
        Ok(ToolOutcome::structured(
            format!("image loaded: {path} ({} bytes)", bytes.len()),
            structured,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal valid 1×1 PNG.
    const PNG: &[u8] = &[
        0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44,
        0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x02, 0x00, 0x00, 0x00, 0x90,
        0x77, 0x53, 0xde, 0x00, 0x00, 0x00, 0x0c, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0xf8,
        0xcf, 0xc0, 0x00, 0x00, 0x03, 0x01, 0x01, 0x00, 0xc9, 0xfe, 0x92, 0xef, 0x00, 0x00, 0x00,
        0x00, 0x49, 0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
    ];

    #[tokio::test]
    async fn reads_png_as_base64_with_media_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pixel.png");
        std::fs::write(&path, PNG).unwrap();

        let out = ReadImageTool
            .execute(
                &ExecContext::new(),
                &json!({"path": path.to_str().unwrap()}),
            )
            .await
            .unwrap();
        let s = out.structured.unwrap();
        assert_eq!(s["mediaType"], json!("image/png"));
        assert_eq!(s["size"], json!(PNG.len()));
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(s["dataBase64"].as_str().unwrap())
            .unwrap();
        assert_eq!(decoded, PNG);
    }

    #[tokio::test]
    async fn non_image_extension_rejected() {
        let err = ReadImageTool
            .execute(&ExecContext::new(), &json!({"path": "/tmp/notes.txt"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
