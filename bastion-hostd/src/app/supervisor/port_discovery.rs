use crate::ports::supervisor::PortProbe;
use serde::Serialize;
use std::io;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PortStrategy {
    Preferred,
    Scanned,
    Ephemeral,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortChoice {
    pub port: u16,
    pub strategy: PortStrategy,
}

/// Preferred port, then a linear scan of the next `span` ports, then an OS
/// assigned one. Freedom is only a hint: the caller re-checks right before
/// spawning and the post-spawn health probe is what counts.
pub async fn discover_port(
    probe: &dyn PortProbe,
    preferred: u16,
    span: u16,
) -> io::Result<PortChoice> {
    if probe.is_free(preferred).await {
        return Ok(PortChoice {
            port: preferred,
            strategy: PortStrategy::Preferred,
        });
    }
    debug!(preferred, "preferred backend port busy; scanning");
    for offset in 1..=span {
        let Some(port) = preferred.checked_add(offset) else {
            break;
        };
        if probe.is_free(port).await {
            return Ok(PortChoice {
                port,
                strategy: PortStrategy::Scanned,
            });
        }
    }
    let port = probe.ephemeral().await?;
    Ok(PortChoice {
        port,
        strategy: PortStrategy::Ephemeral,
    })
}
