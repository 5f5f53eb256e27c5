// Output tree layout and page persistence

use crate::error::{MirrorError, Result};
use replica_scanner::Bucket;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{Span, info, info_span};
use url::Url;

/// Directory reserved for the authentication scaffold.
pub const AUTH_DIR: &str = "auth";

/// Create the output root with every bucket directory plus `auth/`.
pub async fn create_layout(output_dir: &Path) -> Result<()> {
    let dirs = Bucket::ALL
        .iter()
        .map(|b| b.dir_name())
        .chain(std::iter::once(AUTH_DIR));
    for dir in dirs {
        let path = output_dir.join(dir);
        fs::create_dir_all(&path)
            .await
            .map_err(|e| MirrorError::Startup(format!("cannot create {}: {}", path.display(), e)))?;
    }
    Ok(())
}

/// File a captured page is stored under, relative to the mirror root.
///
/// The base URL becomes `index.html`. Other pages keep their path, gaining
/// `.html` when the last segment has no extension. The query is ignored.
pub fn page_output_path(page_url: &str, base_url: &Url) -> String {
    let base = base_url.as_str().trim_end_matches('/');
    if page_url.trim_end_matches('/') == base {
        return "index.html".to_string();
    }

    let path = match Url::parse(page_url) {
        Ok(url) => url.path().trim_matches('/').to_string(),
        Err(_) => String::new(),
    };
    if path.is_empty() {
        return "home.html".to_string();
    }

    let last = path.rsplit('/').next().unwrap_or(&path);
    if last.contains('.') {
        path
    } else {
        format!("{}.html", path)
    }
}

pub struct PageWriter {
    output_dir: PathBuf,
    base_url: Url,
    span: Span,
}

impl PageWriter {
    pub fn new(output_dir: impl Into<PathBuf>, base_url: Url) -> Self {
        Self {
            output_dir: output_dir.into(),
            base_url,
            span: info_span!("persist"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Write one page, creating parent directories as needed.
    pub async fn write(&self, page_url: &str, html: &str) -> Result<PathBuf> {
        let relative = page_output_path(page_url, &self.base_url);
        let path = self.output_dir.join(&relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| MirrorError::io(parent, e))?;
        }
        fs::write(&path, html)
            .await
            .map_err(|e| MirrorError::io(&path, e))?;
        self.span.in_scope(|| info!("Saved {}", path.display()));
        Ok(path)
    }
}
