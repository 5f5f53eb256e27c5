use crate::error::Result;
use crate::result::PageRecord;
use crate::session::BrowserSession;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, Span, info, info_span, warn};

/// Reports `(index, total, url)` before each page is rendered.
pub type CaptureProgressCallback = Arc<dyn Fn(usize, usize, String) + Send + Sync>;

/// Renders each discovered URL and records its final markup and resources.
pub struct PageCapture {
    timeout: Duration,
    settle_delay: Duration,
    progress_callback: Option<CaptureProgressCallback>,
    span: Span,
}

impl PageCapture {
    pub fn new(timeout: Duration, settle_delay: Duration) -> Self {
        Self {
            timeout,
            settle_delay,
            progress_callback: None,
            span: info_span!("capture"),
        }
    }

    pub fn with_progress_callback(mut self, callback: CaptureProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Capture every URL in input order. Pages that fail to render are
    /// logged and left out of the result.
    pub async fn capture(
        &self,
        session: &mut dyn BrowserSession,
        urls: &[String],
    ) -> Vec<PageRecord> {
        let span = self.span.clone();
        async move {
            info!("Processing {} pages", urls.len());
            let mut pages = Vec::with_capacity(urls.len());

            for (index, url) in urls.iter().enumerate() {
                if let Some(ref callback) = self.progress_callback {
                    callback(index, urls.len(), url.clone());
                }
                info!("Processing page {}/{}: {}", index + 1, urls.len(), url);

                match self.capture_one(session, url).await {
                    Ok(page) => pages.push(page),
                    Err(e) => warn!("Failed to process page {}: {}", url, e),
                }
            }

            info!("Captured {} of {} pages", pages.len(), urls.len());
            pages
        }
        .instrument(span)
        .await
    }

    async fn capture_one(
        &self,
        session: &mut dyn BrowserSession,
        url: &str,
    ) -> Result<PageRecord> {
        session.navigate(url, self.timeout).await?;
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        let html = session.current_markup().await?;
        let title = session.current_title().await?;
        let resources = session.resource_inventory().await?;

        Ok(PageRecord::new(url.to_string(), html, title, resources))
    }
}
