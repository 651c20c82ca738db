use colored::Colorize;
use serde::Serialize;

use crate::analysis::AnalysisSummary;
use crate::crawler::CrawlOutcome;
use crate::view::ViewTree;

/// Output verbosity mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Quiet,       // Only errors
    Normal,      // Standard output
    Verbose,     // More details
    VeryVerbose, // Timing and report details
}

impl OutputMode {
    pub fn from_flags(quiet: bool, verbose: u8) -> Self {
        if quiet {
            OutputMode::Quiet
        } else if verbose >= 2 {
            OutputMode::VeryVerbose
        } else if verbose == 1 {
            OutputMode::Verbose
        } else {
            OutputMode::Normal
        }
    }
}

#[derive(Serialize)]
struct JsonSummary {
    version: String,
    timestamp: String,
    root: String,
    outcome: &'static str,
    directories: u64,
    files: u64,
    security_errors: u64,
    total_bytes: u64,
    total_human: String,
    elapsed_ms: u64,
    report_path: Option<String>,
    report_error: Option<String>,
}

fn outcome_label(outcome: CrawlOutcome) -> &'static str {
    match outcome {
        CrawlOutcome::Completed(_) => "completed",
        CrawlOutcome::Cancelled => "cancelled",
    }
}

fn json_summary(summary: &AnalysisSummary) -> JsonSummary {
    JsonSummary {
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        root: summary.root.clone(),
        outcome: outcome_label(summary.outcome),
        directories: summary.directories,
        files: summary.files,
        security_errors: summary.security_errors,
        total_bytes: summary.total_size.bytes(),
        total_human: summary.total_size.human(),
        elapsed_ms: summary.elapsed.as_millis() as u64,
        report_path: summary
            .report_path
            .as_ref()
            .map(|p| p.display().to_string()),
        report_error: summary.report_error.clone(),
    }
}

pub fn print_json(summary: &AnalysisSummary) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&json_summary(summary))?);
    Ok(())
}

pub fn print_summary(summary: &AnalysisSummary, mode: OutputMode) {
    if mode == OutputMode::Quiet {
        return;
    }

    println!();
    println!("{}", "Directory Analysis".bold());
    println!("{}", "=".repeat(60).dimmed());
    println!("  {:<18} {}", "Root:", summary.root);

    let status = match summary.outcome {
        CrawlOutcome::Completed(_) => "completed".green(),
        CrawlOutcome::Cancelled => "cancelled".yellow(),
    };
    println!("  {:<18} {}", "Status:", status);
    println!("  {:<18} {}", "Directories:", format_number(summary.directories));
    println!("  {:<18} {}", "Files:", format_number(summary.files));
    if summary.security_errors > 0 {
        println!(
            "  {:<18} {}",
            "Unreadable:",
            format_number(summary.security_errors).red()
        );
    }
    println!("  {:<18} {}", "Total size:", summary.total_size.human().cyan().bold());

    if mode != OutputMode::Normal {
        println!("  {:<18} {} bytes", "Exact size:", summary.total_size.bytes());
    }
    if mode == OutputMode::VeryVerbose {
        println!("  {:<18} {:.2?}", "Elapsed:", summary.elapsed);
    }

    match (&summary.report_path, &summary.report_error) {
        (_, Some(err)) => println!("  {:<18} {}", "Report:", format!("failed: {}", err).red()),
        (Some(path), None) => println!("  {:<18} {}", "Report:", path.display()),
        (None, None) => {}
    }
    println!();
}

/// Print the final view as an indented tree.
pub fn print_tree(tree: &ViewTree) {
    for line in tree.render().lines() {
        if line.ends_with(" !") {
            println!("{}", line.red());
        } else {
            println!("{}", line);
        }
    }
}

fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
