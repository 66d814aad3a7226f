use serde::Serialize;

/// Result of a one-off process discovery (`status` subcommand).
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub identity: String,
    pub list_command: String,
    pub running: usize,
}

/// Print the status report.
///
/// - `json = true`: emit a pretty-printed JSON object to stdout.
/// - `json = false`: emit a one-line human-readable summary to stdout.
pub fn print_status(report: &StatusReport, json: bool) {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("error serialising status: {}", e),
        }
        return;
    }

    println!("{}", format_status(report));
}

pub fn format_status(report: &StatusReport) -> String {
    match report.running {
        0 => format!("{}: not running", report.identity),
        1 => format!("{}: 1 instance running", report.identity),
        n => format!(
            "{}: {} instances running (expected at most one)",
            report.identity, n
        ),
    }
}
