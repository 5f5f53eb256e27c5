// Asset resolution: normalise, name, download and map every referenced resource

use crate::config::AssetConfig;
use crate::error::{MirrorError, Result};
use crate::markup::{self, CSS_URL};
use futures::future::join_all;
use replica_scanner::{Bucket, PageRecord};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tracing::{Instrument, Span, debug, info, info_span, warn};
use url::Url;

/// Where one original reference string ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetRecord {
    /// Path relative to the mirror root, always `/` separated.
    pub local_path: String,
    pub bucket: Bucket,
    /// Absolute URL the file was fetched from.
    pub source_url: String,
}

/// Original reference string -> local file. Only successful downloads appear.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AssetMap {
    records: HashMap<String, AssetRecord>,
}

impl AssetMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, reference: &str) -> Option<&str> {
        self.records.get(reference).map(|r| r.local_path.as_str())
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.records.contains_key(reference)
    }

    pub fn insert(&mut self, reference: impl Into<String>, record: AssetRecord) {
        self.records.insert(reference.into(), record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolveStats {
    pub fetched: usize,
    pub failed: usize,
    pub skipped: usize,
    pub reused: usize,
}

/// A reference as found, with the document it should be resolved against.
#[derive(Debug, Clone)]
struct Reference {
    raw: String,
    bucket: Bucket,
    referrer: Url,
}

#[derive(Debug, Clone)]
struct DownloadJob {
    key: String,
    aliases: Vec<String>,
    url: Url,
    bucket: Bucket,
    local_path: String,
    destination: PathBuf,
}

struct FetchFailure {
    reason: String,
    transient: bool,
}

impl FetchFailure {
    fn permanent(reason: impl ToString) -> Self {
        Self {
            reason: reason.to_string(),
            transient: false,
        }
    }

    fn transient(reason: impl ToString) -> Self {
        Self {
            reason: reason.to_string(),
            transient: true,
        }
    }
}

/// Downloads every resource referenced by the captured pages into the
/// bucket directories of the output tree.
///
/// Each distinct original reference string is attempted at most once per
/// run, whether it succeeds or not. Planning (normalisation and file naming)
/// is sequential so names are deterministic; only the transfers run
/// concurrently.
pub struct AssetResolver {
    client: Client,
    base_url: Url,
    output_dir: PathBuf,
    config: AssetConfig,
    download_timeout: Duration,
    retries: u32,
    map: AssetMap,
    by_url: HashMap<String, AssetRecord>,
    attempted: HashSet<String>,
    reserved: HashMap<Bucket, HashSet<String>>,
    stats: ResolveStats,
    span: Span,
}

impl AssetResolver {
    pub fn new(client: Client, base_url: Url, output_dir: impl Into<PathBuf>, config: AssetConfig) -> Self {
        let download_timeout = config.download_timeout();
        Self {
            client,
            base_url,
            output_dir: output_dir.into(),
            config,
            download_timeout,
            retries: 0,
            map: AssetMap::new(),
            by_url: HashMap::new(),
            attempted: HashSet::new(),
            reserved: HashMap::new(),
            stats: ResolveStats::default(),
            span: info_span!("assets"),
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn stats(&self) -> ResolveStats {
        self.stats
    }

    pub fn asset_map(&self) -> &AssetMap {
        &self.map
    }

    /// Resolve every reference of every page, bucket by bucket.
    ///
    /// Download failures are logged and counted; the reference simply stays
    /// out of the returned map.
    pub async fn resolve(&mut self, pages: &[PageRecord]) -> AssetMap {
        let span = self.span.clone();
        self.resolve_inner(pages).instrument(span).await;
        self.map.clone()
    }

    async fn resolve_inner(&mut self, pages: &[PageRecord]) {
        let references = self.collect(pages);
        info!(
            "Resolving {} asset references from {} pages",
            references.values().map(Vec::len).sum::<usize>(),
            pages.len()
        );

        for bucket in Bucket::ALL {
            let Some(refs) = references.get(&bucket) else {
                continue;
            };
            let jobs = self.plan(refs);
            let fetched = self.execute(jobs).await;

            if bucket == Bucket::Stylesheet {
                for job in fetched {
                    if let Err(e) = self.process_stylesheet(&job).await {
                        warn!("Failed to post-process stylesheet {}: {}", job.local_path, e);
                    }
                }
            }
        }

        info!(
            "Assets: {} fetched, {} failed, {} skipped, {} reused",
            self.stats.fetched, self.stats.failed, self.stats.skipped, self.stats.reused
        );
    }

    /// Union of the DOM inventory and the raw markup scan, per bucket, in
    /// page order. The first page to mention a reference is its referrer.
    fn collect(&self, pages: &[PageRecord]) -> HashMap<Bucket, Vec<Reference>> {
        let mut collected: HashMap<Bucket, Vec<Reference>> = HashMap::new();
        let mut seen: HashSet<(Bucket, String)> = HashSet::new();

        for page in pages {
            let referrer = Url::parse(&page.url).unwrap_or_else(|_| self.base_url.clone());
            let scanned = markup::scan_references(&page.html);
            for (bucket, raw) in page.resources.iter().chain(scanned.iter()) {
                if seen.insert((bucket, raw.to_string())) {
                    collected.entry(bucket).or_default().push(Reference {
                        raw: raw.to_string(),
                        bucket,
                        referrer: referrer.clone(),
                    });
                }
            }
        }

        collected
    }

    /// Turn references into download jobs, reusing anything already mapped.
    fn plan(&mut self, refs: &[Reference]) -> Vec<DownloadJob> {
        let mut jobs: Vec<DownloadJob> = Vec::new();
        let mut pending: HashMap<String, usize> = HashMap::new();

        for reference in refs {
            let raw = reference.raw.as_str();
            if self.map.contains(raw) {
                self.stats.reused += 1;
                continue;
            }
            if !self.attempted.insert(raw.to_string()) {
                continue;
            }
            if !is_fetchable(raw) {
                debug!("Skipping non-fetchable reference {}", truncate(raw));
                self.stats.skipped += 1;
                continue;
            }
            let Some(url) = normalize_reference(raw, &self.base_url, &reference.referrer) else {
                debug!("Skipping unresolvable reference {}", raw);
                self.stats.skipped += 1;
                continue;
            };

            if self.config.dedupe_by_url {
                if let Some(record) = self.by_url.get(url.as_str()) {
                    self.map.insert(raw, record.clone());
                    self.stats.reused += 1;
                    continue;
                }
                if let Some(&index) = pending.get(url.as_str()) {
                    jobs[index].aliases.push(raw.to_string());
                    continue;
                }
            }

            let file_name = match derive_file_name(&url) {
                Some(name) => {
                    let extension = Path::new(&name)
                        .extension()
                        .and_then(|e| e.to_str())
                        .unwrap_or("");
                    if !self.config.allows_extension(extension) {
                        debug!("Skipping {} (extension .{} not allowed)", url, extension);
                        self.stats.skipped += 1;
                        continue;
                    }
                    name
                }
                None => synthesized_file_name(reference.bucket),
            };

            let bucket = reference.bucket;
            let directory = self.output_dir.join(bucket.dir_name());
            let reserved = self.reserved.entry(bucket).or_default();
            let file_name = unique_file_name(&directory, reserved, &file_name);
            reserved.insert(file_name.clone());

            if self.config.dedupe_by_url {
                pending.insert(url.to_string(), jobs.len());
            }
            jobs.push(DownloadJob {
                key: raw.to_string(),
                aliases: Vec::new(),
                url,
                bucket,
                local_path: format!("{}/{}", bucket.dir_name(), file_name),
                destination: directory.join(&file_name),
            });
        }

        jobs
    }

    /// Run the downloads with bounded concurrency and record the outcomes.
    /// Returns the jobs that succeeded, in plan order.
    async fn execute(&mut self, jobs: Vec<DownloadJob>) -> Vec<DownloadJob> {
        if jobs.is_empty() {
            return Vec::new();
        }

        let semaphore = Arc::new(Semaphore::new(self.config.concurrent_downloads.max(1)));
        let client = &self.client;
        let max_file_size = self.config.max_file_size;
        let timeout = self.download_timeout;
        let retries = self.retries;

        let outcomes = join_all(jobs.into_iter().map(|job| {
            let semaphore = semaphore.clone();
            async move {
                let outcome = match semaphore.acquire().await {
                    Ok(_permit) => download(client, &job, max_file_size, timeout, retries).await,
                    Err(e) => Err(MirrorError::fetch(job.url.as_str(), e)),
                };
                (job, outcome)
            }
        }))
        .await;

        let mut fetched = Vec::new();
        for (job, outcome) in outcomes {
            match outcome {
                Ok(bytes) => {
                    debug!("Saved {} ({} bytes) -> {}", job.url, bytes, job.local_path);
                    let record = AssetRecord {
                        local_path: job.local_path.clone(),
                        bucket: job.bucket,
                        source_url: job.url.to_string(),
                    };
                    self.map.insert(job.key.clone(), record.clone());
                    for alias in &job.aliases {
                        self.map.insert(alias.clone(), record.clone());
                        self.stats.reused += 1;
                    }
                    self.by_url.insert(job.url.to_string(), record);
                    self.stats.fetched += 1;
                    fetched.push(job);
                }
                Err(e) => {
                    warn!("{}", e);
                    self.stats.failed += 1;
                }
            }
        }

        fetched
    }

    /// Download the `url()` references of a saved stylesheet and point them
    /// at the local copies, relative to the stylesheet's own directory.
    async fn process_stylesheet(&mut self, job: &DownloadJob) -> Result<()> {
        let bytes = fs::read(&job.destination)
            .await
            .map_err(|e| MirrorError::io(&job.destination, e))?;
        let css = String::from_utf8_lossy(&bytes).into_owned();

        let mut refs = Vec::new();
        let mut seen = HashSet::new();
        for caps in CSS_URL.captures_iter(&css) {
            let raw = caps[1].trim().to_string();
            if seen.insert(raw.clone()) {
                refs.push(Reference {
                    bucket: Bucket::classify_stylesheet_reference(&raw),
                    raw,
                    referrer: job.url.clone(),
                });
            }
        }
        if refs.is_empty() {
            return Ok(());
        }
        debug!("{} references inside {}", refs.len(), job.local_path);

        for bucket in Bucket::ALL {
            let group: Vec<Reference> = refs.iter().filter(|r| r.bucket == bucket).cloned().collect();
            if !group.is_empty() {
                let jobs = self.plan(&group);
                self.execute(jobs).await;
            }
        }

        let stylesheet_dir = job
            .local_path
            .rsplit_once('/')
            .map(|(dir, _)| dir)
            .unwrap_or("");
        let rewritten = CSS_URL.replace_all(&css, |caps: &regex::Captures| {
            match self.map.get(caps[1].trim()) {
                Some(local) => format!("url('{}')", relative_path(stylesheet_dir, local)),
                None => caps[0].to_string(),
            }
        });

        if rewritten != css {
            fs::write(&job.destination, rewritten.as_bytes())
                .await
                .map_err(|e| MirrorError::io(&job.destination, e))?;
        }
        Ok(())
    }
}

async fn download(
    client: &Client,
    job: &DownloadJob,
    max_file_size: u64,
    timeout: Duration,
    retries: u32,
) -> Result<u64> {
    let mut attempt = 0;
    loop {
        match fetch_once(client, job, max_file_size, timeout).await {
            Ok(bytes) => return Ok(bytes),
            Err(failure) => {
                let _ = fs::remove_file(&job.destination).await;
                if failure.transient && attempt < retries {
                    attempt += 1;
                    debug!("Retrying {} ({}/{}): {}", job.url, attempt, retries, failure.reason);
                    continue;
                }
                return Err(MirrorError::fetch(job.url.as_str(), failure.reason));
            }
        }
    }
}

async fn fetch_once(
    client: &Client,
    job: &DownloadJob,
    max_file_size: u64,
    timeout: Duration,
) -> std::result::Result<u64, FetchFailure> {
    let mut response = client
        .get(job.url.clone())
        .timeout(timeout)
        .send()
        .await
        .map_err(classify_request_error)?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchFailure {
            reason: format!("HTTP {}", status),
            transient: status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS,
        });
    }
    if let Some(length) = response.content_length()
        && length > max_file_size
    {
        return Err(FetchFailure::permanent(format!(
            "{} bytes exceeds the {} byte limit",
            length, max_file_size
        )));
    }

    let mut file = fs::File::create(&job.destination)
        .await
        .map_err(|e| FetchFailure::permanent(format!("{}: {}", job.destination.display(), e)))?;

    let mut written: u64 = 0;
    while let Some(chunk) = response.chunk().await.map_err(classify_request_error)? {
        written += chunk.len() as u64;
        if written > max_file_size {
            return Err(FetchFailure::permanent(format!(
                "body exceeds the {} byte limit",
                max_file_size
            )));
        }
        file.write_all(&chunk)
            .await
            .map_err(FetchFailure::permanent)?;
    }
    file.flush().await.map_err(FetchFailure::permanent)?;

    Ok(written)
}

fn classify_request_error(e: reqwest::Error) -> FetchFailure {
    if e.is_timeout() || e.is_connect() {
        FetchFailure::transient(e)
    } else {
        FetchFailure::permanent(e)
    }
}

fn is_fetchable(raw: &str) -> bool {
    let lowered = raw.trim().to_ascii_lowercase();
    !(lowered.is_empty()
        || lowered.starts_with('#')
        || lowered.starts_with("data:")
        || lowered.starts_with("blob:")
        || lowered.starts_with("javascript:")
        || lowered.starts_with("about:"))
}

fn truncate(raw: &str) -> &str {
    match raw.char_indices().nth(48) {
        Some((i, _)) => &raw[..i],
        None => raw,
    }
}

/// Absolute URL for a reference.
///
/// Protocol-relative references take the base scheme, root-relative ones
/// the base origin, and plain relative ones resolve against `referrer`.
pub fn normalize_reference(raw: &str, base: &Url, referrer: &Url) -> Option<Url> {
    let raw = raw.trim();
    let mut url = if raw.starts_with("//") {
        Url::parse(&format!("{}:{}", base.scheme(), raw)).ok()?
    } else if raw.starts_with('/') {
        base.join(raw).ok()?
    } else if let Ok(absolute) = Url::parse(raw) {
        absolute
    } else {
        referrer.join(raw).ok()?
    };

    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

/// Last path segment of `url`, sanitised, when it carries an extension.
pub fn derive_file_name(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    let name = sanitize_file_name(segment);
    let path = Path::new(&name);
    match (path.file_stem(), path.extension()) {
        (Some(stem), Some(ext)) if !stem.is_empty() && !ext.is_empty() => Some(name),
        _ => None,
    }
}

pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' | '%' => '_',
            c if c.is_whitespace() || c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Name for a reference whose URL gives no usable file name.
pub fn synthesized_file_name(bucket: Bucket) -> String {
    let token = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "asset_{}_{}{}",
        chrono::Utc::now().timestamp_millis(),
        &token[..8],
        bucket.default_extension()
    )
}

/// `name`, or `{stem}_{n}{ext}` for the first `n` that is neither reserved
/// nor already present in `directory`.
pub fn unique_file_name(directory: &Path, reserved: &HashSet<String>, name: &str) -> String {
    let taken = |candidate: &str| reserved.contains(candidate) || directory.join(candidate).exists();
    if !taken(name) {
        return name.to_string();
    }

    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{}", ext)),
        _ => (name, String::new()),
    };
    let mut counter = 1;
    loop {
        let candidate = format!("{}_{}{}", stem, counter, ext);
        if !taken(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Relative path from directory `from_dir` to `target`, both relative to the
/// mirror root, with `/` separators.
pub fn relative_path(from_dir: &str, target: &str) -> String {
    pathdiff::diff_paths(Path::new(target), Path::new(from_dir))
        .unwrap_or_else(|| PathBuf::from(target))
        .to_string_lossy()
        .replace('\\', "/")
}
