// Post-hoc structural checks over a finished mirror

use crate::error::{MirrorError, Result};
use crate::markup;
use crate::persist::AUTH_DIR;
use colored::*;
use replica_scanner::Bucket;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub output_dir: PathBuf,
    pub pages_found: usize,
    pub assets_found: usize,
    /// Local references into a bucket directory across all pages.
    pub references_rewritten: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| MirrorError::Config(format!("cannot serialise report: {}", e)))
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "{} {}\n",
            "Mirror:".bold(),
            self.output_dir.display()
        ));
        out.push_str(&format!("  Pages:      {}\n", self.pages_found));
        out.push_str(&format!("  Assets:     {}\n", self.assets_found));
        out.push_str(&format!("  Rewritten:  {}\n", self.references_rewritten));

        for warning in &self.warnings {
            out.push_str(&format!("  {} {}\n", "warning:".yellow(), warning));
        }
        for error in &self.errors {
            out.push_str(&format!("  {} {}\n", "error:".red().bold(), error));
        }
        if self.is_ok() {
            out.push_str(&format!("  {}\n", "OK".green().bold()));
        }
        out
    }
}

/// Validate the mirror rooted at `output_dir`.
pub fn validate_mirror(output_dir: &Path) -> Result<ValidationReport> {
    if !output_dir.is_dir() {
        return Err(MirrorError::Config(format!(
            "{} is not a directory",
            output_dir.display()
        )));
    }
    info!("Validating mirror at {}", output_dir.display());

    let mut report = ValidationReport {
        output_dir: output_dir.to_path_buf(),
        ..Default::default()
    };

    check_pages(output_dir, &mut report);
    check_assets(output_dir, &mut report);
    check_layout(output_dir, &mut report);

    info!(
        "Validation finished: {} errors, {} warnings",
        report.errors.len(),
        report.warnings.len()
    );
    Ok(report)
}

fn check_pages(output_dir: &Path, report: &mut ValidationReport) {
    let mut pages = collect_files(output_dir);
    pages.retain(|p| p.extension().is_some_and(|e| e == "html"));
    report.pages_found = pages.len();

    for page in pages {
        let html = match fs::read_to_string(&page) {
            Ok(html) => html,
            Err(e) => {
                report
                    .errors
                    .push(format!("Failed to read {}: {}", page.display(), e));
                continue;
            }
        };
        let page_dir = page.parent().unwrap_or(output_dir);

        for reference in local_asset_references(&html) {
            let target = page_dir.join(&reference);
            if is_bucket_reference(output_dir, &target) {
                report.references_rewritten += 1;
            }
            if !target.exists() {
                report.warnings.push(format!(
                    "Missing asset: {} in {}",
                    reference,
                    display_relative(output_dir, &page)
                ));
            }
        }
    }
}

/// `href`/`src` of stylesheet links, scripts and images that point into
/// the mirror rather than at a remote host.
fn local_asset_references(html: &str) -> Vec<String> {
    markup::start_tags(html)
        .into_iter()
        .filter_map(|tag| match tag.name.as_str() {
            "link" => tag.attr("href").map(str::to_string),
            "script" | "img" => tag.attr("src").map(str::to_string),
            _ => None,
        })
        .map(|r| r.split(['?', '#']).next().unwrap_or("").to_string())
        .filter(|r| is_local(r))
        .collect()
}

fn is_local(reference: &str) -> bool {
    let lowered = reference.to_ascii_lowercase();
    !(lowered.is_empty()
        || lowered.starts_with("//")
        || lowered.starts_with('/')
        || lowered.contains("://")
        || lowered.starts_with("data:")
        || lowered.starts_with("javascript:")
        || lowered.starts_with("mailto:"))
}

fn is_bucket_reference(output_dir: &Path, target: &Path) -> bool {
    let Ok(normalized) = normalize(target).strip_prefix(normalize(output_dir)).map(Path::to_path_buf)
    else {
        return false;
    };
    normalized
        .components()
        .next()
        .and_then(|c| c.as_os_str().to_str())
        .is_some_and(|first| Bucket::ALL.iter().any(|b| b.dir_name() == first))
}

/// Lexically resolve `..` and `.` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

fn check_assets(output_dir: &Path, report: &mut ValidationReport) {
    for bucket in Bucket::ALL {
        let dir = output_dir.join(bucket.dir_name());
        let files = collect_files(&dir);
        report.assets_found += files.len();

        for file in files {
            if fs::metadata(&file).map(|m| m.len() == 0).unwrap_or(false) {
                report.warnings.push(format!(
                    "Empty asset file: {}",
                    display_relative(output_dir, &file)
                ));
            }
        }
    }
}

fn check_layout(output_dir: &Path, report: &mut ValidationReport) {
    let buckets = Bucket::ALL.iter().map(Bucket::dir_name);
    for dir in std::iter::once(AUTH_DIR).chain(buckets) {
        if !output_dir.join(dir).is_dir() {
            report.warnings.push(format!("Missing directory: {}", dir));
        }
    }

    let has_index = ["index.html", "index.php"]
        .iter()
        .any(|name| output_dir.join(name).is_file());
    if !has_index {
        report
            .errors
            .push("No index file found (index.html or index.php)".to_string());
    }
}

/// Regular files below `dir`. Symlinks are not followed.
fn collect_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            debug!("Found {}", e.path().display());
            e.into_path()
        })
        .collect()
}

fn display_relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}
