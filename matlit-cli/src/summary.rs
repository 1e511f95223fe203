//! End-of-run console summary.

use std::fmt::Write as _;
use std::path::Path;

use matlit_core::{MaterialRecord, RunSummary};

pub fn render(
    material: &MaterialRecord,
    summary: &RunSummary,
    target_count: usize,
    run_dir: &Path,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out);
    let _ = writeln!(out, "  Material:   {}", material.describe());
    if !material.elements.is_empty() {
        let _ = writeln!(out, "  Elements:   {}", material.elements.join(", "));
    }
    let _ = writeln!(
        out,
        "  Screening:  {} candidates, {} evaluated, {} of {} relevant",
        summary.candidates, summary.evaluated, summary.accepted, target_count
    );
    let _ = writeln!(
        out,
        "  Full texts: {} acquired ({} publisher, {} shadow library), {} denied, {} not found, {} errors",
        summary.acquired,
        summary.acquired_publisher,
        summary.acquired_shadow,
        summary.denied,
        summary.not_found,
        summary.errors
    );
    let _ = writeln!(out, "  Success:    {:.1}% of attempts", summary.success_rate());
    if summary.analysis_attempts > 0 {
        let _ = writeln!(
            out,
            "  Analysis:   {} of {} PDFs analysed",
            summary.analysis_successes, summary.analysis_attempts
        );
    }
    let _ = write!(out, "  Output:     {}", run_dir.display());
    out
}
