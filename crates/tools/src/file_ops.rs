//! Built-in file reader with byte-range continuation.

use serde_json::{json, Value};

use ag_domain::tool::ToolOutcome;
use ag_domain::{Error, ExecContext, Result};

use crate::Tool;

/// Bytes returned when the caller does not specify a limit.
const DEFAULT_LIMIT: u64 = 20_000;

pub struct ReadFileTool;

#[async_trait::async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "fs.read"
    }

    fn description(&self) -> &str {
        "Read a file slice. Defaults to the first 20 KB; continue with \
         offset + limit. The structured result carries hasMore/remaining \
         and the next byte range."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path to read" },
                "offset": { "type": "integer", "description": "Byte offset to start from (default 0)" },
                "limit": { "type": "integer", "description": "Maximum bytes to return" }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn output_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "content": { "type": "string" },
                "returned": { "type": "integer" },
                "remaining": { "type": "integer" },
                "hasMore": { "type": "boolean" },
                "nextRange": { "type": "object" }
            }
        }))
    }

    async fn execute(&self, ctx: &ExecContext, args: &Value) -> Result<ToolOutcome> {
        ctx.check()?;
        let path = args
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation("missing required parameter 'path'"))?;
        let offset = args.get("offset").and_then(Value::as_u64).unwrap_or(0);
        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_LIMIT)
            .max(1);

        let bytes = tokio::fs::read(path).await?;
        let total = bytes.len() as u64;
        let start = offset.min(total) as usize;
        let end = (offset.saturating_add(limit)).min(total) as usize;
        let slice = &bytes[start..end];
        let content = String::from_utf8_lossy(slice).into_owned();

        let returned = (end - start) as u64;
        let remaining = total - end as u64;
        let has_more = remaining > 0;
        let structured = json!({
            "content": content,
            "returned": returned,
            "remaining": remaining,
            "hasMore": has_more,
            "nextRange": if has_more {
                json!({ "bytes": { "offset": end as u64, "length": remaining } })
            } else {
                Value::Null
            },
        });
        Ok(ToolOutcome::structured(content, structured))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_fixture(content: &[u8]) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), content).unwrap();
        file
    }

    #[tokio::test]
    async fn full_read_has_no_continuation() {
        let file = write_fixture(b"hello world");
        let out = ReadFileTool
            .execute(
                &ExecContext::new(),
                &json!({"path": file.path().to_str().unwrap()}),
            )
            .await
            .unwrap();
        assert_eq!(out.content, "hello world");
        let s = out.structured.unwrap();
        assert_eq!(s["hasMore"], json!(false));
        assert_eq!(s["remaining"], json!(0));
        assert!(s["nextRange"].is_null());
    }

    #[tokio::test]
    async fn bounded_read_reports_next_range() {
        let file = write_fixture(b"0123456789");
        let out = ReadFileTool
            .execute(
                &ExecContext::new(),
                &json!({"path": file.path().to_str().unwrap(), "offset": 2, "limit": 3}),
            )
            .await
            .unwrap();
        assert_eq!(out.content, "234");
        let s = out.structured.unwrap();
        assert_eq!(s["hasMore"], json!(true));
        assert_eq!(s["remaining"], json!(5));
        assert_eq!(s["nextRange"]["bytes"]["offset"], json!(5));
        assert_eq!(s["nextRange"]["bytes"]["length"], json!(5));
    }

    #[tokio::test]
    async fn missing_path_is_validation_error() {
        let err = ReadFileTool
            .execute(&ExecContext::new(), &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
