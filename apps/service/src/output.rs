use anyhow::Result;

use crate::monitoring::types::Report;

/// Render a report as human-readable text.
pub fn render_text(report: &Report) -> String {
    let mut out = String::new();

    out.push_str(&format!("Check {} at {}\n", report.id, report.started_at.to_rfc3339()));
    out.push_str(&format!("Status: {}\n", report.status));
    out.push_str(&format!(
        "Servers: {} checked, {} reachable\n",
        report.servers_checked, report.servers_reachable
    ));

    if !report.servers_unreachable.is_empty() {
        out.push_str(&format!("Unreachable: {}\n", report.servers_unreachable.join(", ")));
    }

    if !report.findings.is_empty() {
        out.push_str("\nFailed jobs:\n");
        for finding in &report.findings {
            out.push_str(&format!(
                "  {} {} {} ({}s): {}\n",
                finding.failed_at.to_rfc3339(),
                finding.server,
                finding.job_name,
                finding.duration_seconds,
                finding.message
            ));
        }
    }

    out.push_str(&format!("\n{}\n", report.summary));
    out
}

/// Render a report as pretty-printed JSON.
pub fn render_json(report: &Report) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}
