//! Output and Reporting
//!
//! Formats extraction results for the terminal: a human-readable report with
//! per-document lines, a summary only, or JSON.

use std::time::Duration;

use crate::cli::{OutputFormat, VerbosityLevel};
use crate::directive::CaptureKind;
use crate::extract::{DocumentResult, DocumentStatus, ExtractionResults};
use crate::rules::CapturedItem;

/// Longest captured value shown in verbose output
const PREVIEW_CHARS: usize = 60;

/// Output formatter for extraction results
pub struct Output {
    format: OutputFormat,
    verbosity: VerbosityLevel,
    show_colors: bool,
}

impl Output {
    pub fn new(format: OutputFormat, verbosity: VerbosityLevel) -> Self {
        Self {
            format,
            verbosity,
            show_colors: atty::is(atty::Stream::Stdout),
        }
    }

    /// Force colours on or off
    pub fn with_colors(mut self, show_colors: bool) -> Self {
        self.show_colors = show_colors;
        self
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.show_colors {
            format!("\x1b[{}m{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    pub fn format_results(&self, results: &ExtractionResults) -> serde_json::Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(results),
            OutputFormat::Summary => Ok(self.format_summary(results)),
            OutputFormat::Human => Ok(self.format_human(results)),
        }
    }

    fn format_human(&self, results: &ExtractionResults) -> String {
        let mut output = String::new();

        if self.verbosity == VerbosityLevel::Quiet {
            if results.has_failures() {
                output.push_str(&format!(
                    "Failed: {} Skipped: {}\n",
                    results.failed_documents, results.skipped_documents
                ));
            }
            return output;
        }

        for document in &results.document_results {
            // Normal verbosity only lists documents that need attention.
            if self.verbosity >= VerbosityLevel::Verbose || !document.status.is_extracted() {
                output.push_str(&self.format_document_result(document));
                output.push('\n');
            }
        }
        output.push_str(&self.format_summary(results));
        output
    }

    pub fn format_document_result(&self, result: &DocumentResult) -> String {
        let path_display = result.path.display();
        let duration_str = format_duration(result.duration);

        match &result.status {
            DocumentStatus::Extracted { items, files } => {
                let mut output = format!(
                    "{}  {} ({}) - {} item{}, {} file{}",
                    self.colorize("✓ EXTRACTED", "32"),
                    path_display,
                    duration_str,
                    items.len(),
                    plural(items.len()),
                    files,
                    plural(*files)
                );
                if self.verbosity >= VerbosityLevel::Verbose {
                    for item in items {
                        output.push_str("\n    ");
                        output.push_str(&format_item(item));
                    }
                }
                output
            }
            DocumentStatus::Failed { message, .. } => format!(
                "{}  {} ({}) - {}",
                self.colorize("✗ FAILED", "31"),
                path_display,
                duration_str,
                message
            ),
            DocumentStatus::Skipped { reason } => format!(
                "{}  {} - {}",
                self.colorize("- SKIPPED", "36"),
                path_display,
                reason
            ),
        }
    }

    fn format_summary(&self, results: &ExtractionResults) -> String {
        let mut output = String::new();
        output.push_str("Extraction Summary:\n");
        output.push_str(&format!("  Total documents: {}\n", results.total_documents));
        output.push_str(&format!(
            "  {} {}\n",
            self.colorize("Extracted:", "32"),
            results.extracted_documents
        ));

        if results.failed_documents > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Failed:", "31"),
                results.failed_documents
            ));
        }
        if results.skipped_documents > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Skipped:", "36"),
                results.skipped_documents
            ));
        }

        output.push_str(&format!("  Items captured: {}\n", results.total_items));
        output.push_str(&format!("  Files written: {}\n", results.total_files));
        output.push_str(&format!("  Success rate: {:.1}%\n", results.success_rate()));
        output.push_str(&format!(
            "  Duration: {}\n",
            format_duration(results.total_duration)
        ));
        output
    }
}

fn format_item(item: &CapturedItem) -> String {
    match (&item.file, &item.content) {
        (Some(file), _) => format!("{} -> {}", item.path, file.display()),
        (None, Some(content)) => {
            let label = match item.kind {
                CaptureKind::Element => "markup",
                _ => "value",
            };
            format!("{} [{}] {}", item.path, label, preview(content))
        }
        (None, None) => format!("{} (empty)", item.path),
    }
}

fn preview(content: &str) -> String {
    let single_line: String = content
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    if single_line.chars().count() <= PREVIEW_CHARS {
        single_line
    } else {
        let cut: String = single_line.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}…")
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}

fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs_f64();
    if total_secs < 1.0 {
        format!("{:.0}ms", duration.as_millis())
    } else if total_secs < 60.0 {
        format!("{:.2}s", total_secs)
    } else {
        let mins = (total_secs / 60.0) as u64;
        let secs = total_secs % 60.0;
        format!("{}m{:.1}s", mins, secs)
    }
}
