//! Prometheus metrics for the link subsystem.
//!
//! Every recorder is a no-op until [`init`] has run, so library users and
//! unit tests never need a registry.
//!
//! - `slircd_s2s_commands_total{command}` - inbound lines by command
//! - `slircd_s2s_dedup_dropped_total` - envelopes already seen
//! - `slircd_s2s_flood_disconnects_total` - links dropped by the flood gate
//! - `slircd_s2s_collisions_total{kind,resolution}` - nick and channel-TS collisions
//! - `slircd_s2s_links_active` - authenticated links
//! - `slircd_s2s_link_errors_total{error}` - link-fatal errors by code

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use slirc_link_proto::command;
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

// ========================================================================
// Counters
// ========================================================================

/// Inbound lines by command.
pub static S2S_COMMANDS: OnceLock<IntCounterVec> = OnceLock::new();

/// Envelopes dropped because their message id was already seen.
pub static DEDUP_DROPPED: OnceLock<IntCounter> = OnceLock::new();

/// Links torn down for exceeding the flood gate.
pub static FLOOD_DISCONNECTS: OnceLock<IntCounter> = OnceLock::new();

/// Collisions resolved, by kind (`nick`, `channel`) and outcome.
pub static COLLISIONS: OnceLock<IntCounterVec> = OnceLock::new();

/// Link-fatal errors by code.
pub static LINK_ERRORS: OnceLock<IntCounterVec> = OnceLock::new();

// ========================================================================
// Gauges
// ========================================================================

/// Authenticated links.
pub static LINKS_ACTIVE: OnceLock<IntGauge> = OnceLock::new();

/// Initialize the registry. Later calls are harmless.
pub fn init() {
    let r = registry();

    macro_rules! register {
        ($metric:ident, $init:expr) => {
            match $init {
                Ok(m) => {
                    if let Err(e) = r.register(Box::new(m.clone())) {
                        tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
                    }
                    let _ = $metric.set(m);
                }
                Err(e) => {
                    tracing::error!(error = %e, concat!("Failed to create metric ", stringify!($metric)));
                }
            }
        };
    }

    register!(S2S_COMMANDS, IntCounterVec::new(Opts::new("slircd_s2s_commands_total", "S2S lines processed by command"), &["command"]));
    register!(DEDUP_DROPPED, IntCounter::new("slircd_s2s_dedup_dropped_total", "S2S envelopes dropped as duplicates"));
    register!(FLOOD_DISCONNECTS, IntCounter::new("slircd_s2s_flood_disconnects_total", "S2S links dropped for excess flood"));
    register!(COLLISIONS, IntCounterVec::new(Opts::new("slircd_s2s_collisions_total", "Nick and channel collisions resolved"), &["kind", "resolution"]));
    register!(LINK_ERRORS, IntCounterVec::new(Opts::new("slircd_s2s_link_errors_total", "Link-fatal errors by code"), &["error"]));
    register!(LINKS_ACTIVE, IntGauge::new("slircd_s2s_links_active", "Authenticated server links"));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

// ============================================================================
// Recorders
// ============================================================================

/// Count an inbound line. Unknown commands share one label to bound
/// cardinality.
#[inline]
pub fn record_command(cmd: &str) {
    if let Some(c) = S2S_COMMANDS.get() {
        let label = if command::is_known(cmd) { cmd } else { "other" };
        c.with_label_values(&[label]).inc();
    }
}

#[inline]
pub fn record_dedup_drop() {
    if let Some(c) = DEDUP_DROPPED.get() {
        c.inc();
    }
}

#[inline]
pub fn record_flood_disconnect() {
    if let Some(c) = FLOOD_DISCONNECTS.get() {
        c.inc();
    }
}

#[inline]
pub fn record_collision(kind: &str, resolution: &str) {
    if let Some(c) = COLLISIONS.get() {
        c.with_label_values(&[kind, resolution]).inc();
    }
}

#[inline]
pub fn record_link_error(code: &str) {
    if let Some(c) = LINK_ERRORS.get() {
        c.with_label_values(&[code]).inc();
    }
}

#[inline]
pub fn link_up() {
    if let Some(g) = LINKS_ACTIVE.get() {
        g.inc();
    }
}

#[inline]
pub fn link_down() {
    if let Some(g) = LINKS_ACTIVE.get() {
        g.dec();
    }
}
