//! Backup display formatting
//!
//! Formats artifacts, stats and verification reports for terminal output.

use chrono::{DateTime, Utc};
use tabled::{settings::Style, Table, Tabled};

use crate::backup::{Artifact, BackupStats, VerificationReport};

#[derive(Tabled)]
struct BackupRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Age")]
    age: String,
    #[tabled(rename = "Size")]
    size: String,
}

/// Format the artifact list as a table
pub fn format_backup_list(artifacts: &[Artifact], now: DateTime<Utc>) -> String {
    if artifacts.is_empty() {
        return "No backups found.".to_string();
    }

    let rows = artifacts.iter().enumerate().map(|(i, artifact)| BackupRow {
        index: i + 1,
        name: artifact.name.clone(),
        created: artifact.created_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        age: format_duration(now.signed_duration_since(artifact.created_at)),
        size: format_size(artifact.size_bytes),
    });

    let mut table = Table::new(rows);
    table.with(Style::psql());
    format!("{}\n\nTotal: {} backup(s)", table, artifacts.len())
}

/// Format aggregate statistics
pub fn format_stats(stats: &BackupStats) -> String {
    let mut output = String::new();
    output.push_str("Backup Statistics\n");
    output.push_str("=================\n");
    output.push_str(&format!("Backups:     {} (keeping {})\n", stats.count, stats.max_backups));
    output.push_str(&format!("Total size:  {}\n", format_size(stats.total_bytes)));

    if let Some(newest) = &stats.newest {
        output.push_str(&format!(
            "Newest:      {} ({})\n",
            newest.name,
            newest.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    if let Some(oldest) = &stats.oldest {
        output.push_str(&format!(
            "Oldest:      {} ({})\n",
            oldest.name,
            oldest.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }

    output
}

/// Format a verification report
pub fn format_report(report: &VerificationReport) -> String {
    let yes_no = |b: bool| if b { "Yes" } else { "No" };

    let mut output = String::new();
    output.push_str("Backup Details\n");
    output.push_str("==============\n");
    output.push_str(&format!("File: {}\n", report.name));
    output.push_str(&format!("Size: {}\n", format_size(report.size_bytes)));
    output.push('\n');
    output.push_str("Contents:\n");
    output.push_str(&format!("  Schema:              {}\n", yes_no(report.has_schema)));
    output.push_str(&format!("  Transaction markers: {}\n", yes_no(report.has_transaction_markers)));
    output.push_str(&format!("  Completion marker:   {}\n", yes_no(report.has_completion_marker)));
    output.push('\n');
    output.push_str(&format!("Status: {}\n", report.summary()));
    output
}

/// Format a duration in human-readable form
pub fn format_duration(duration: chrono::Duration) -> String {
    let total_seconds = duration.num_seconds().max(0);

    if total_seconds < 60 {
        return format!("{}s", total_seconds);
    }

    let minutes = total_seconds / 60;
    if minutes < 60 {
        return format!("{}m", minutes);
    }

    let hours = minutes / 60;
    if hours < 24 {
        return format!("{}h", hours);
    }

    let days = hours / 24;
    if days < 30 {
        return format!("{}d", days);
    }

    let months = days / 30;
    format!("{}mo", months)
}

/// Format a file size in human-readable form
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
