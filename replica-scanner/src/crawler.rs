use crate::error::{Result, ScanError};
use crate::session::BrowserSession;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, Span, debug, info, info_span, warn};
use url::Url;

pub type ProgressCallback = Arc<dyn Fn(usize, String) + Send + Sync>;

/// Expands the same-origin page graph reachable from a seed URL.
///
/// Discovery is a breadth-first fixpoint over a FIFO frontier: every newly
/// found URL is queued and expanded once, so the result is the full
/// transitive closure bounded only by `max_depth` and `max_pages`.
pub struct Discoverer {
    discovered: Vec<String>,
    discovered_set: HashSet<String>,
    visited: HashSet<String>,
    max_depth: usize,
    max_pages: usize,
    timeout: Duration,
    progress_callback: Option<ProgressCallback>,
    span: Span,
}

impl Discoverer {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            discovered: Vec::new(),
            discovered_set: HashSet::new(),
            visited: HashSet::new(),
            max_depth: 3,
            max_pages: 100,
            timeout,
            progress_callback: None,
            span: info_span!("discover"),
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_max_pages(mut self, pages: usize) -> Self {
        self.max_pages = pages;
        self
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Discover every same-origin URL reachable from `seed`, seed first.
    pub async fn discover(
        &mut self,
        session: &mut dyn BrowserSession,
        seed: &str,
    ) -> Result<Vec<String>> {
        let span = self.span.clone();
        self.discover_inner(session, seed).instrument(span).await
    }

    async fn discover_inner(
        &mut self,
        session: &mut dyn BrowserSession,
        seed: &str,
    ) -> Result<Vec<String>> {
        let mut seed_url =
            Url::parse(seed).map_err(|e| ScanError::InvalidUrl(format!("{}: {}", seed, e)))?;
        seed_url.set_fragment(None);
        info!("Starting URL discovery from {}", seed_url);

        let mut frontier: VecDeque<(String, usize)> = VecDeque::new();
        if self.mark_discovered(seed_url.as_str()) {
            frontier.push_back((seed_url.to_string(), 0));
        }

        while let Some((url, depth)) = frontier.pop_front() {
            if depth >= self.max_depth || self.visited.contains(&url) {
                continue;
            }

            if let Some(ref callback) = self.progress_callback {
                callback(self.visited.len(), url.clone());
            }

            let links = match Self::expand(session, &url, self.timeout).await {
                Ok(links) => links,
                Err(e) => {
                    warn!("Failed to discover URLs from {}: {}", url, e);
                    continue;
                }
            };
            self.visited.insert(url.clone());

            let mut added = 0;
            for link in links {
                if !is_same_origin(&link, &seed_url) {
                    debug!("  -> Cross-origin, skipping {}", link);
                    continue;
                }
                if self.discovered.len() >= self.max_pages {
                    debug!("Page ceiling of {} reached", self.max_pages);
                    break;
                }
                if self.mark_discovered(link.as_str()) {
                    added += 1;
                    frontier.push_back((link.to_string(), depth + 1));
                }
            }
            info!("Found {} new same-origin URLs on {}", added, url);
        }

        info!("Discovered {} unique URLs", self.discovered.len());
        Ok(self.discovered.clone())
    }

    /// Render `url` and return its outbound links resolved against the page's location.
    async fn expand(
        session: &mut dyn BrowserSession,
        url: &str,
        timeout: Duration,
    ) -> Result<Vec<Url>> {
        session.navigate(url, timeout).await?;
        let location = session.current_url().await.unwrap_or_else(|_| url.to_string());
        let hrefs = session.link_targets().await?;
        Ok(hrefs
            .iter()
            .filter_map(|href| resolve_link(&location, href))
            .collect())
    }

    fn mark_discovered(&mut self, url: &str) -> bool {
        if self.discovered_set.insert(url.to_string()) {
            self.discovered.push(url.to_string());
            true
        } else {
            false
        }
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    pub fn is_visited(&self, url: &str) -> bool {
        self.visited.contains(url)
    }
}

impl Default for Discoverer {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve an anchor target against the page it appeared on.
///
/// Returns `None` for script, mail, phone and data targets, fragment-only
/// links and anything that is not http(s). The fragment is removed.
pub fn resolve_link(base: &str, href: &str) -> Option<Url> {
    let href = href.trim();
    let lowered = href.to_ascii_lowercase();
    if href.is_empty()
        || href.starts_with('#')
        || lowered.starts_with("javascript:")
        || lowered.starts_with("mailto:")
        || lowered.starts_with("tel:")
        || lowered.starts_with("data:")
    {
        return None;
    }

    let base_url = Url::parse(base).ok()?;
    let mut resolved = base_url.join(href).ok()?;
    if resolved.scheme() != "http" && resolved.scheme() != "https" {
        return None;
    }
    resolved.set_fragment(None);
    Some(resolved)
}

/// Scheme, host and port must all match.
pub fn is_same_origin(url: &Url, origin: &Url) -> bool {
    url.origin() == origin.origin()
}
