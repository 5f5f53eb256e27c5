use crate::assets::{AssetResolver, ResolveStats};
use crate::config::MirrorConfig;
use crate::error::{MirrorError, Result};
use crate::persist::{PageWriter, create_layout};
use crate::rewrite::PathRewriter;
use crate::validate::{ValidationReport, validate_mirror};
use indicatif::{ProgressBar, ProgressStyle};
use replica_scanner::{
    AuthOutcome, BrowserSession, CaptureProgressCallback, Discoverer, PageCapture,
    ProgressCallback, authenticate,
};
use reqwest::Client;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Instrument, info, info_span, warn};

/// Options for a mirror run
pub struct MirrorOptions {
    pub config: MirrorConfig,
    pub show_progress_bars: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MirrorSummary {
    pub pages_discovered: usize,
    pub pages_captured: usize,
    pub assets: ResolveStats,
    pub references_rewritten: usize,
    pub pages_written: usize,
    pub authenticated: bool,
    pub output_dir: PathBuf,
    pub validation: Option<ValidationReport>,
}

/// Run the whole pipeline against `session`: layout, authentication,
/// discovery, capture, asset resolution, rewriting and persistence.
///
/// The session is closed before returning, on success and on failure.
pub async fn run_mirror(
    options: MirrorOptions,
    session: &mut dyn BrowserSession,
) -> Result<MirrorSummary> {
    let result = run_stages(&options, session).await;
    if let Err(e) = session.close().await {
        warn!("Failed to close browser session: {}", e);
    }
    result
}

async fn run_stages(
    options: &MirrorOptions,
    session: &mut dyn BrowserSession,
) -> Result<MirrorSummary> {
    let config = &options.config;
    let base_url = config.validate()?;
    let output_dir = config.output.directory.clone();

    let progress_bar = if options.show_progress_bars {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .map_err(|e| MirrorError::Startup(e.to_string()))?,
        );
        pb.set_message("Preparing output directory...");
        Some(Arc::new(pb))
    } else {
        None
    };
    let set_message = |message: String| {
        if let Some(ref pb) = progress_bar {
            pb.set_message(message);
            pb.tick();
        }
    };

    create_layout(&output_dir).await?;
    info!("Output directory: {}", output_dir.display());

    let mut authenticated = false;
    if let Some((username, password)) = config.credentials.pair() {
        set_message(format!("Logging in as {}...", username));
        let outcome = authenticate(session, base_url.as_str(), username, password, config.timeout())
            .instrument(info_span!("auth"))
            .await
            .map_err(|e| MirrorError::Startup(format!("authentication failed: {}", e)))?;
        authenticated = outcome == AuthOutcome::Submitted;
    }

    let discover_progress: ProgressCallback = match progress_bar {
        Some(ref pb) => {
            let pb = pb.clone();
            Arc::new(move |visited: usize, url: String| {
                pb.set_message(format!("Discovering... {} pages expanded ({})", visited, url));
                pb.tick();
            })
        }
        None => Arc::new(|_: usize, _: String| {}),
    };
    let mut discoverer = Discoverer::with_timeout(config.timeout())
        .with_max_depth(config.target.max_depth)
        .with_max_pages(config.target.max_pages)
        .with_progress_callback(discover_progress)
        .with_span(info_span!("discover", seed = %base_url));
    let urls = discoverer.discover(session, base_url.as_str()).await?;

    let capture_progress: CaptureProgressCallback = match progress_bar {
        Some(ref pb) => {
            let pb = pb.clone();
            Arc::new(move |index: usize, total: usize, url: String| {
                pb.set_message(format!("Capturing page {}/{}: {}", index + 1, total, url));
                pb.tick();
            })
        }
        None => Arc::new(|_: usize, _: usize, _: String| {}),
    };
    let capture = PageCapture::new(config.timeout(), config.settle_delay())
        .with_progress_callback(capture_progress)
        .with_span(info_span!("capture"));
    let pages = capture.capture(session, &urls).await;

    set_message(format!("Downloading assets for {} pages...", pages.len()));
    let client = Client::builder()
        .user_agent(config.crawler.user_agent.as_str())
        .cookie_store(true)
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .map_err(|e| MirrorError::Startup(format!("cannot build HTTP client: {}", e)))?;
    let mut resolver = AssetResolver::new(client, base_url.clone(), &output_dir, config.assets.clone())
        .with_retries(config.target.retries)
        .with_span(info_span!("assets"));
    let assets = resolver.resolve(&pages).await;

    set_message("Rewriting and saving pages...".to_string());
    let rewriter = PathRewriter::new(base_url.clone()).with_span(info_span!("rewrite"));
    let writer = PageWriter::new(&output_dir, base_url.clone())
        .with_span(info_span!("persist", dir = %output_dir.display()));
    let mut pages_written = 0;
    let mut references_rewritten = 0;
    for page in &pages {
        let outcome = rewriter.rewrite(page, &assets);
        references_rewritten += outcome.references;
        match writer.write(&page.url, &outcome.html).await {
            Ok(_) => pages_written += 1,
            Err(e) => warn!("Failed to save {}: {}", page.url, e),
        }
    }

    set_message("Validating mirror...".to_string());
    let validate_dir = output_dir.clone();
    let validation = match tokio::task::spawn_blocking(move || validate_mirror(&validate_dir)).await
    {
        Ok(Ok(report)) => Some(report),
        Ok(Err(e)) => {
            warn!("Validation skipped: {}", e);
            None
        }
        Err(e) => {
            warn!("Validation task failed: {}", e);
            None
        }
    };

    if let Some(ref pb) = progress_bar {
        pb.finish_and_clear();
    }

    info!(
        "Mirror complete: {} pages written, {} assets fetched",
        pages_written,
        resolver.stats().fetched
    );

    Ok(MirrorSummary {
        pages_discovered: urls.len(),
        pages_captured: pages.len(),
        assets: resolver.stats(),
        references_rewritten,
        pages_written,
        authenticated,
        output_dir,
        validation,
    })
}
