//! Workspace URIs and on-disk layout.
//!
//! A virtual `workspace://localhost/<relative>` scheme maps to the active
//! workspace root. Cache and index locations derive from the runtime root
//! and honor the `AGENTLY_SNAPSHOT_PATH` / `AGENTLY_INDEX_PATH` templates.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Environment variables
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const ENV_WORKSPACE: &str = "AGENTLY_WORKSPACE";
pub const ENV_WORKSPACE_NO_DEFAULTS: &str = "AGENTLY_WORKSPACE_NO_DEFAULTS";
pub const ENV_INDEX_PATH: &str = "AGENTLY_INDEX_PATH";
pub const ENV_SNAPSHOT_PATH: &str = "AGENTLY_SNAPSHOT_PATH";
pub const ENV_TOOLCALL_TIMEOUT: &str = "AGENTLY_TOOLCALL_TIMEOUT";
pub const ENV_SCHEDULER_DEBUG: &str = "AGENTLY_SCHEDULER_DEBUG";
pub const ENV_DEBUG_EMBEDIUS: &str = "AGENTLY_DEBUG_EMBEDIUS";

const SCHEME: &str = "workspace://localhost/";

/// Workspace kinds recognized at the head of a relative path.
pub const KNOWN_KINDS: [&str; 9] = [
    "agents", "model", "embedder", "mcp", "workflow", "tool", "oauth", "feeds", "a2a",
];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Roots
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The active workspace root: `AGENTLY_WORKSPACE` when set, else
/// `~/.agently` unless defaults are disabled.
pub fn workspace_root() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(ENV_WORKSPACE) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    if std::env::var(ENV_WORKSPACE_NO_DEFAULTS).is_ok() {
        return Err(Error::validation(
            "workspace root not configured and defaults are disabled",
        ));
    }
    dirs::home_dir()
        .map(|home| home.join(".agently"))
        .ok_or_else(|| Error::Fatal("cannot determine home directory".into()))
}

/// Runtime scratch root holding snapshots and index stores.
pub fn runtime_root() -> Result<PathBuf> {
    Ok(workspace_root()?.join(".runtime"))
}

/// Expand `${user}`, `${workspaceRoot}`, and `${runtimeRoot}` in a path
/// template.
pub fn expand_template(template: &str, user: &str) -> Result<PathBuf> {
    let workspace = workspace_root()?;
    let runtime = runtime_root()?;
    let expanded = template
        .replace("${user}", user)
        .replace("${workspaceRoot}", &workspace.to_string_lossy())
        .replace("${runtimeRoot}", &runtime.to_string_lossy());
    Ok(PathBuf::from(expanded))
}

/// Snapshot cache root: `AGENTLY_SNAPSHOT_PATH` template or
/// `${runtimeRoot}/snapshots`.
pub fn snapshot_cache_root(user: &str) -> Result<PathBuf> {
    match std::env::var(ENV_SNAPSHOT_PATH) {
        Ok(tmpl) if !tmpl.is_empty() => expand_template(&tmpl, user),
        _ => Ok(runtime_root()?.join("snapshots")),
    }
}

/// Index store path: `AGENTLY_INDEX_PATH` template or
/// `${runtimeRoot}/index/<user>/embedius.sqlite`.
pub fn index_path(user: &str) -> Result<PathBuf> {
    match std::env::var(ENV_INDEX_PATH) {
        Ok(tmpl) if !tmpl.is_empty() => expand_template(&tmpl, user),
        _ => Ok(runtime_root()?.join("index").join(user).join("embedius.sqlite")),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// URI normalization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Normalize any accepted workspace reference to
/// `workspace://localhost/<relative>`.
///
/// - `workspace://` inputs pass through (agent-id segments lower-cased
///   under `agents/`).
/// - `file://` paths under `root` rewrite; others are rejected.
/// - Relative paths (known kinds included) resolve under the root.
pub fn normalize_uri(input: &str, root: &Path) -> Result<String> {
    let trimmed = input.trim();
    if let Some(rel) = trimmed.strip_prefix(SCHEME) {
        return Ok(format!("{SCHEME}{}", lowercase_agent_segment(rel)));
    }
    if trimmed.starts_with("workspace://") {
        return Err(Error::validation(format!(
            "workspace uri must use the localhost authority: {input}"
        )));
    }
    if let Some(path) = trimmed.strip_prefix("file://") {
        let abs = Path::new(path);
        let rel = abs.strip_prefix(root).map_err(|_| {
            Error::NotAllowed(format!(
                "file uri outside workspace root {}: {input}",
                root.display()
            ))
        })?;
        let rel = rel.to_string_lossy().replace('\\', "/");
        return Ok(format!("{SCHEME}{}", lowercase_agent_segment(&rel)));
    }
    if trimmed.starts_with('/') {
        // Absolute paths must come in as file:// to be checked against the root.
        return Err(Error::NotAllowed(format!(
            "absolute path outside workspace scheme: {input}"
        )));
    }
    let rel = trimmed.trim_start_matches("./");
    Ok(format!("{SCHEME}{}", lowercase_agent_segment(rel)))
}

fn lowercase_agent_segment(rel: &str) -> String {
    let mut segments: Vec<String> = rel.split('/').map(str::to_owned).collect();
    if segments.len() >= 2 && segments[0] == "agents" {
        segments[1] = segments[1].to_lowercase();
    }
    segments.join("/")
}

/// True when the head segment of a relative path is a recognized workspace
/// kind.
pub fn is_known_kind(rel: &str) -> bool {
    rel.split('/')
        .next()
        .is_some_and(|head| KNOWN_KINDS.contains(&head))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_uri_passes_through_with_agent_lowercase() {
        let root = Path::new("/ws");
        let out = normalize_uri("workspace://localhost/agents/MyAgent/prompt.md", root).unwrap();
        assert_eq!(out, "workspace://localhost/agents/myagent/prompt.md");
    }

    #[test]
    fn file_uri_under_root_rewrites() {
        let root = Path::new("/ws");
        let out = normalize_uri("file:///ws/model/config.yaml", root).unwrap();
        assert_eq!(out, "workspace://localhost/model/config.yaml");
    }

    #[test]
    fn file_uri_outside_root_rejected() {
        let root = Path::new("/ws");
        let err = normalize_uri("file:///etc/passwd", root).unwrap_err();
        assert!(matches!(err, Error::NotAllowed(_)));
    }

    #[test]
    fn bare_relative_resolves_under_root() {
        let root = Path::new("/ws");
        assert_eq!(
            normalize_uri("notes/todo.md", root).unwrap(),
            "workspace://localhost/notes/todo.md"
        );
        assert_eq!(
            normalize_uri("agents/Main", root).unwrap(),
            "workspace://localhost/agents/main"
        );
    }

    #[test]
    fn known_kinds_recognized() {
        assert!(is_known_kind("agents/main"));
        assert!(is_known_kind("embedder/default"));
        assert!(!is_known_kind("scratch/file.txt"));
    }
}
