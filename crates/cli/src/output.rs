// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Output formatting for CLI commands

use clap::ValueEnum;
use dlock_core::ResourceSnapshot;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Print `value` as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Header row matching [`resource_row`]
pub fn resource_header() -> String {
    format!("{:<24} {:<38} {:>10} WAITING", "RESOURCE", "HOLDER", "REMAINING")
}

/// One table row per resource
pub fn resource_row(snapshot: &ResourceSnapshot) -> String {
    let (holder, remaining) = match &snapshot.holder {
        Some(holder) if holder.expired => (holder.token.as_str(), "expired".to_string()),
        Some(holder) => (holder.token.as_str(), format_remaining(holder.remaining_ms)),
        None => ("-", "-".to_string()),
    };
    format!(
        "{:<24} {:<38} {:>10} {}",
        snapshot.resource, holder, remaining, snapshot.waiting
    )
}

/// Multi-line description of one resource
pub fn resource_detail(snapshot: &ResourceSnapshot) -> String {
    let mut out = format!("Resource: {}\n", snapshot.resource);
    match &snapshot.holder {
        Some(holder) => {
            out.push_str(&format!("  Holder: {}\n", holder.token));
            if holder.expired {
                out.push_str("  Lease: expired (reclaimed on next acquire)\n");
            } else {
                out.push_str(&format!(
                    "  Lease: {} remaining\n",
                    format_remaining(holder.remaining_ms)
                ));
            }
        }
        None => out.push_str("  Holder: none\n"),
    }
    out.push_str(&format!("  Waiting: {}", snapshot.waiting));
    out
}

/// Compact duration: `850ms`, `12.3s`, `4m05s`
pub fn format_remaining(ms: u64) -> String {
    match ms {
        0..=999 => format!("{}ms", ms),
        1_000..=59_999 => format!("{}.{}s", ms / 1000, (ms % 1000) / 100),
        _ => format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1000),
    }
}

/// Uptime as `1h02m03s`
pub fn format_uptime(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h{:02}m{:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m{:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

#[cfg(test)]
#[path = "output_tests.rs"]
mod tests;
