//! On-disk layout of a run directory.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::types::{MaterialId, PaperCandidate};

pub const MATERIAL_INFO_FILE: &str = "material_info.json";
pub const PAPERS_FILE: &str = "papers.csv";
pub const SCREENING_FILE: &str = "screening.csv";
pub const ANALYSIS_FILE: &str = "analysis.csv";
pub const RUN_STATS_FILE: &str = "run_stats.json";
pub const SUMMARY_FILE: &str = "summary_report.txt";
pub const PDF_DIR: &str = "pdf";
pub const ANALYSIS_DIR: &str = "analysis";

/// Characters of the title kept in a PDF file name.
const TITLE_CHARS_IN_FILENAME: usize = 30;
/// Characters of the title kept in an analysis file name.
const TITLE_CHARS_IN_ANALYSIS_NAME: usize = 50;

/// A created run directory: `<base>/mp-N-<YYYYmmdd_HHMMSS>/` with `pdf/`
/// and `analysis/` subdirectories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirectory {
    root: PathBuf,
}

impl RunDirectory {
    /// Create a fresh run directory for `material` under `base`.
    ///
    /// A numeric suffix is appended if a run for the same material already
    /// started within the same second.
    pub fn create(
        base: &Path,
        material: &MaterialId,
        started: DateTime<Local>,
    ) -> std::io::Result<Self> {
        std::fs::create_dir_all(base)?;
        let stem = format!("{}-{}", material, started.format("%Y%m%d_%H%M%S"));
        let mut root = base.join(&stem);
        let mut suffix = 2;
        loop {
            match std::fs::create_dir(&root) {
                Ok(()) => break,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    root = base.join(format!("{stem}-{suffix}"));
                    suffix += 1;
                }
                Err(e) => return Err(e),
            }
        }
        std::fs::create_dir_all(root.join(PDF_DIR))?;
        std::fs::create_dir_all(root.join(ANALYSIS_DIR))?;
        info!(path = %root.display(), "Created run directory");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pdf_dir(&self) -> PathBuf {
        self.root.join(PDF_DIR)
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Destination for a candidate's PDF: `pdf/paper_<rank:02>_<safe title>.pdf`.
    pub fn pdf_path(&self, candidate: &PaperCandidate) -> PathBuf {
        self.pdf_dir().join(pdf_file_name(candidate))
    }

    pub fn analysis_dir(&self) -> PathBuf {
        self.root.join(ANALYSIS_DIR)
    }

    /// Destination for a candidate's analysis text.
    pub fn analysis_path(&self, candidate: &PaperCandidate) -> PathBuf {
        self.analysis_dir().join(paper_file_name(
            candidate,
            TITLE_CHARS_IN_ANALYSIS_NAME,
            "txt",
        ))
    }

    /// Remove the directory and everything in it. Used when a run fails
    /// after the directory was created.
    pub fn discard(&self) {
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => info!(path = %self.root.display(), "Removed incomplete run directory"),
            Err(e) => warn!(
                path = %self.root.display(),
                error = %e,
                "Could not remove incomplete run directory"
            ),
        }
    }
}

pub fn pdf_file_name(candidate: &PaperCandidate) -> String {
    paper_file_name(candidate, TITLE_CHARS_IN_FILENAME, "pdf")
}

fn paper_file_name(candidate: &PaperCandidate, title_chars: usize, extension: &str) -> String {
    let title: String = candidate.title.chars().take(title_chars).collect();
    let safe = safe_filename(&title);
    if safe.is_empty() {
        format!("paper_{:02}.{extension}", candidate.rank)
    } else {
        format!("paper_{:02}_{}.{extension}", candidate.rank, safe)
    }
}

/// Make `text` usable as a file name on every common filesystem.
///
/// Reserved characters become `_`, whitespace runs collapse to a single
/// `_`, and leading/trailing dots and underscores are removed.
pub fn safe_filename(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_whitespace = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                out.push('_');
            }
            in_whitespace = true;
            continue;
        }
        in_whitespace = false;
        match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => out.push('_'),
            c if c.is_control() => out.push('_'),
            c => out.push(c),
        }
    }
    out.trim_matches(|c| c == '.' || c == '_').to_string()
}
