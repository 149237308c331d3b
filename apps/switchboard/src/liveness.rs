//! Phantom elimination: a per-tenant background sweep that probes every
//! registered terminal through the ordinary routing path and evicts
//! entries that stop answering. A metadata entry can outlive its socket
//! (ungraceful drops the transport has not surfaced yet); without this
//! sweep the router would forward into the void indefinitely.

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::host;
use crate::registry::Tenant;

/// Monitor loop for one tenant, started at tenant bootstrap and running
/// until process shutdown. The first tick fires immediately, so the first
/// sweep overlaps connection bootstrap. A failed sweep is logged and
/// retried on the next tick, never propagated.
pub async fn run(config: Config, tenant: Arc<Tenant>) {
    let mut interval = tokio::time::interval(config.probe_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if let Err(err) = tokio::spawn(sweep(config.clone(), tenant.clone())).await {
            warn!(
                public_key = %tenant.public_key,
                error = %err,
                "liveness sweep aborted; retrying next interval"
            );
        }
    }
}

/// One probing pass over the tenant's registry. Probes run concurrently
/// and independently; a terminal is declared dead only after failing every
/// attempt.
async fn sweep(config: Config, tenant: Arc<Tenant>) {
    let targets = tenant.terminal_ids();
    if targets.is_empty() {
        return;
    }

    let probes = targets.into_iter().map(|terminal_id| {
        let tenant = tenant.clone();
        let config = config.clone();
        async move {
            for attempt in 1..=config.probe_attempts {
                if host::probe(&tenant, &terminal_id, config.probe_timeout).await {
                    return None;
                }
                debug!(terminal = %terminal_id, attempt, "liveness probe failed");
            }
            Some(terminal_id)
        }
    });

    let dead: Vec<String> = join_all(probes).await.into_iter().flatten().collect();
    if dead.is_empty() {
        return;
    }
    for terminal_id in &dead {
        info!(
            terminal = %terminal_id,
            public_key = %tenant.public_key,
            "evicting unresponsive terminal"
        );
        tenant.evict(terminal_id);
    }
    tenant.publish_snapshot();
}
