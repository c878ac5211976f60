use std::fmt::Write;

use crate::check::{CheckOutcome, PageReport};
use crate::ingest::IngestOutcome;
use crate::store::sqlite::IndexStats;

/// Render a check as plain text, one section per page.
pub fn format_check(outcome: &CheckOutcome) -> String {
    let mut out = String::new();
    for report in &outcome.reports {
        format_page(&mut out, report);
    }

    let summary = outcome.summary();
    let _ = write!(
        out,
        "{} page(s) checked, {} flagged as potential plagiarism",
        summary.pages_checked, summary.pages_flagged
    );
    if summary.pages_with_errors > 0 {
        let _ = write!(out, ", {} failed", summary.pages_with_errors);
    }
    if let Some(best) = summary.highest_score {
        let _ = write!(out, " (highest score {best:.3})");
    }
    out.push('\n');
    if outcome.cancelled {
        let _ = writeln!(out, "Cancelled: {} page(s) not checked", outcome.unchecked);
    }
    out
}

fn format_page(out: &mut String, report: &PageReport) {
    let _ = writeln!(out, "## Page {}", report.page_number);
    let _ = writeln!(out, "Preview: {}...", report.preview_text.trim());

    if let Some(err) = &report.error {
        let _ = writeln!(out, "  error: {}\n", err.cause);
        return;
    }
    if report.matches.is_empty() {
        let _ = writeln!(out, "  No similar content found.\n");
        return;
    }

    for (i, m) in report.matches.iter().enumerate() {
        let location = match m.candidate_page {
            Some(page) => format!("{} p.{page}", m.candidate_source),
            None => m.candidate_source.clone(),
        };
        let _ = writeln!(
            out,
            "  Match {}: {location}  score {:.3}  [{}]",
            i + 1,
            m.score,
            m.classification.label()
        );
        for line in m.matched_text.lines().filter(|l| !l.trim().is_empty()).take(6) {
            let _ = writeln!(out, "    | {}", line.trim_end());
        }
    }
    out.push('\n');
}

pub fn format_ingest(outcome: &IngestOutcome) -> String {
    let mut out = format!(
        "Indexed {} page(s) of {}. Collection now holds {} record(s).",
        outcome.inserted, outcome.document_id, outcome.total
    );
    if !outcome.failed.is_empty() {
        let pages: Vec<String> = outcome.failed.iter().map(|p| p.to_string()).collect();
        let _ = write!(out, "\nSkipped page(s): {}", pages.join(", "));
    }
    if !outcome.unstarted.is_empty() {
        let pages: Vec<String> = outcome.unstarted.iter().map(|p| p.to_string()).collect();
        let _ = write!(out, "\nCancelled before page(s): {}", pages.join(", "));
    }
    out
}

pub fn format_stats(stats: &IndexStats) -> String {
    let mut out = format!("Collection: {}\n", stats.collection);
    if let (Some(model), Some(dims)) = (&stats.model, stats.dimensions) {
        let _ = writeln!(out, "Model:      {model} ({dims} dims)");
    }
    let _ = writeln!(out, "Records:    {}", stats.record_count);
    let _ = writeln!(out, "Documents:  {}", stats.source_count);
    let _ = writeln!(out, "DB size:    {:.1} KB", stats.db_size_bytes as f64 / 1024.0);
    for (source, count) in &stats.sources {
        let _ = writeln!(out, "  {count:>5}  {source}");
    }
    out
}
