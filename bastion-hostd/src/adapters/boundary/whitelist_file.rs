use crate::domain::boundary::{Whitelist, WhitelistDocument};
use anyhow::Context;
use std::path::Path;
use tracing::info;

/// Reads a whitelist document from JSON. Without a path the built-in
/// channel set is used.
pub fn load_whitelist(path: Option<&Path>) -> anyhow::Result<Whitelist> {
    let Some(path) = path else {
        return Whitelist::builtin().context("building built-in whitelist");
    };
    let data = std::fs::read(path)
        .with_context(|| format!("reading whitelist {}", path.display()))?;
    let document: WhitelistDocument = serde_json::from_slice(&data)
        .with_context(|| format!("parsing whitelist {}", path.display()))?;
    let whitelist = Whitelist::from_document(document)
        .with_context(|| format!("validating whitelist {}", path.display()))?;
    info!(
        path = %path.display(),
        channels = whitelist.policies().len(),
        "loaded channel whitelist"
    );
    Ok(whitelist)
}
