//! Run-report JSON I/O.
//!
//! Reports are the one artifact the core emits: UTF-8, two-space indent,
//! trailing newline. The read half exists for the diff consumer.

use std::path::Path;

use crate::error::Result;
use crate::model::RunReport;

/// Render a report to its canonical JSON form.
pub fn to_json_string(report: &RunReport) -> Result<String> {
    let mut rendered = serde_json::to_string_pretty(report)?;
    rendered.push('\n');
    Ok(rendered)
}

/// Write a report to disk in its canonical form.
pub fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    std::fs::write(path, to_json_string(report)?)?;
    Ok(())
}

/// Load a previously emitted report.
pub fn read_report(path: &Path) -> Result<RunReport> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}
