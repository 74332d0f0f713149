//! Remote resource URIs.
//!
//! Three accepted input forms identify a server and a resource path:
//!
//! - `mcp://server/path` (hierarchical)
//! - `mcp:server:/path` (shorthand)
//! - `mcp:server://resource` (canonical; the resource may carry a scheme)
//!
//! Canonical emission is always `mcp:<server>://<resource>` with the
//! server-scheme stripped from the resource when it duplicates the server
//! name. These are not RFC URLs, so parsing is bespoke.

use crate::error::{Error, Result};

/// A parsed remote resource reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceUri {
    pub server: String,
    /// Resource path without the `mcp:`/server envelope.
    pub uri: String,
}

impl ResourceUri {
    pub fn new(server: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            uri: uri.into(),
        }
    }

    /// Canonical form `mcp:<server>://<resource>`.
    pub fn canonical(&self) -> String {
        canonical(&self.server, &self.uri)
    }

    /// The resource joined with a relative path below it.
    pub fn join(&self, rel: &str) -> ResourceUri {
        let base = self.uri.trim_end_matches('/');
        let rel = rel.trim_start_matches('/');
        ResourceUri {
            server: self.server.clone(),
            uri: format!("{base}/{rel}"),
        }
    }

    /// The resource path of `self` relative to `base`, when below it.
    pub fn relative_to(&self, base: &ResourceUri) -> Option<String> {
        if self.server != base.server {
            return None;
        }
        let base_path = base.uri.trim_end_matches('/');
        let path = self.uri.trim_end_matches('/');
        if path == base_path {
            return Some(String::new());
        }
        path.strip_prefix(base_path)
            .and_then(|rest| rest.strip_prefix('/'))
            .map(str::to_owned)
    }
}

/// Compose the canonical string for a `(server, resource)` pair.
pub fn canonical(server: &str, resource: &str) -> String {
    let resource = strip_server_scheme(server, resource);
    format!("mcp:{server}://{resource}")
}

fn strip_server_scheme<'a>(server: &str, resource: &'a str) -> &'a str {
    // `github://github.example.com/...` under server `github` drops the
    // duplicated scheme.
    match resource.split_once("://") {
        Some((scheme, rest)) if scheme == server => rest,
        _ => resource,
    }
}

/// Parse any accepted input form.
pub fn parse(input: &str) -> Result<ResourceUri> {
    let trimmed = input.trim();
    if let Some(rest) = trimmed.strip_prefix("mcp://") {
        // Hierarchical: first segment is the server.
        let (server, resource) = match rest.split_once('/') {
            Some((server, resource)) => (server, resource),
            None => (rest, ""),
        };
        if server.is_empty() {
            return Err(Error::validation(format!("resource uri missing server: {input}")));
        }
        return Ok(ResourceUri::new(server, resource));
    }
    if let Some(rest) = trimmed.strip_prefix("mcp:") {
        let (server, rem) = rest
            .split_once(':')
            .ok_or_else(|| Error::validation(format!("malformed resource uri: {input}")))?;
        if server.is_empty() {
            return Err(Error::validation(format!("resource uri missing server: {input}")));
        }
        if let Some(resource) = rem.strip_prefix("//") {
            // Canonical/legacy form; drop a duplicated server scheme.
            return Ok(ResourceUri::new(server, strip_server_scheme(server, resource)));
        }
        if let Some(path) = rem.strip_prefix('/') {
            // Shorthand `mcp:server:/path`.
            return Ok(ResourceUri::new(server, path));
        }
        return Err(Error::validation(format!("malformed resource uri: {input}")));
    }
    Err(Error::validation(format!("unsupported resource uri: {input}")))
}

/// Canonical comparison key: all accepted forms of the same resource map to
/// one string, modulo trailing slashes.
pub fn normalize_for_compare(input: &str) -> Result<String> {
    let parsed = parse(input)?;
    Ok(parsed.canonical().trim_end_matches('/').to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_forms_normalize_identically() {
        let forms = [
            "mcp://github/github.vianttech.com/adelphic/mediator",
            "mcp:github:/github.vianttech.com/adelphic/mediator",
            "mcp:github://github.vianttech.com/adelphic/mediator",
            "mcp:github://github.vianttech.com/adelphic/mediator/",
        ];
        let keys: Vec<String> = forms
            .iter()
            .map(|f| normalize_for_compare(f).unwrap())
            .collect();
        for key in &keys {
            assert_eq!(key, &keys[0]);
        }
        assert_eq!(
            keys[0],
            "mcp:github://github.vianttech.com/adelphic/mediator"
        );
    }

    #[test]
    fn duplicated_server_scheme_is_stripped() {
        let parsed = parse("mcp:github://github://github.vianttech.com/x").unwrap();
        assert_eq!(parsed.server, "github");
        assert_eq!(parsed.uri, "github.vianttech.com/x");
        // A foreign scheme is preserved.
        let other = parse("mcp:github://https://example.com/x").unwrap();
        assert_eq!(other.uri, "https://example.com/x");
    }

    #[test]
    fn canonical_matches_normalize_for_compare() {
        let input = "mcp://fs/data/reports/q1";
        let parsed = parse(input).unwrap();
        assert_eq!(
            canonical(&parsed.server, &parsed.uri),
            normalize_for_compare(input).unwrap()
        );
    }

    #[test]
    fn join_and_relative_round_trip() {
        let root = parse("mcp:github://github.vianttech.com/adelphic/mediator").unwrap();
        let file = root.join("file.txt");
        assert_eq!(
            file.canonical(),
            "mcp:github://github.vianttech.com/adelphic/mediator/file.txt"
        );
        assert_eq!(file.relative_to(&root).as_deref(), Some("file.txt"));
        assert_eq!(root.relative_to(&root).as_deref(), Some(""));
    }

    #[test]
    fn rejects_foreign_schemes() {
        assert!(parse("https://example.com").is_err());
        assert!(parse("mcp:").is_err());
        assert!(parse("mcp:server").is_err());
    }
}
