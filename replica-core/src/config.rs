// Run-level configuration, read once at startup

use crate::error::{MirrorError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub target: TargetConfig,
    pub credentials: Credentials,
    pub crawler: CrawlerConfig,
    pub assets: AssetConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub base_url: String,
    pub max_pages: usize,
    pub max_depth: usize,
    pub timeout_secs: u64,
    /// Extra attempts for transient asset download failures. Off by default.
    pub retries: u32,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            max_pages: 100,
            max_depth: 3,
            timeout_secs: 30,
            retries: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    /// Both halves, when configured.
    pub fn pair(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) if !u.is_empty() => Some((u.as_str(), p.as_str())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Http,
    Chromium,
}

impl FromStr for Engine {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "http" => Ok(Engine::Http),
            "chromium" | "chrome" => Ok(Engine::Chromium),
            other => Err(MirrorError::Config(format!("unknown engine '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    pub engine: Engine,
    pub user_agent: String,
    /// Extra wait after network quiescence so client-side rendering can finish.
    pub settle_delay_ms: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            engine: Engine::Http,
            user_agent: replica_scanner::http::DEFAULT_USER_AGENT.to_string(),
            settle_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    pub max_file_size: u64,
    pub allowed_extensions: Vec<String>,
    pub download_timeout_secs: u64,
    pub concurrent_downloads: usize,
    /// Share one download between references that normalize to the same URL.
    pub dedupe_by_url: bool,
}

impl Default for AssetConfig {
    fn default() -> Self {
        let allowed = [
            ".css", ".js", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp", ".woff", ".woff2",
            ".ttf", ".otf", ".eot", ".ico", ".json", ".xml", ".txt",
        ];
        Self {
            max_file_size: 50 * 1024 * 1024,
            allowed_extensions: allowed.iter().map(|e| e.to_string()).collect(),
            download_timeout_secs: 30,
            concurrent_downloads: 5,
            dedupe_by_url: false,
        }
    }
}

impl AssetConfig {
    /// An empty allow-list permits every extension.
    pub fn allows_extension(&self, extension: &str) -> bool {
        self.allowed_extensions.is_empty()
            || self
                .allowed_extensions
                .iter()
                .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(extension.trim_start_matches('.')))
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("public_html"),
        }
    }
}

impl MirrorConfig {
    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| MirrorError::io(path, e))?;
        serde_json::from_str(&content)
            .map_err(|e| MirrorError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn validate(&self) -> Result<Url> {
        if self.target.base_url.trim().is_empty() {
            return Err(MirrorError::Config("target.base_url is required".to_string()));
        }
        let base = Url::parse(self.target.base_url.trim()).map_err(|e| {
            MirrorError::Config(format!("target.base_url '{}': {}", self.target.base_url, e))
        })?;
        if base.scheme() != "http" && base.scheme() != "https" {
            return Err(MirrorError::Config(format!(
                "target.base_url must be http(s), got '{}'",
                base.scheme()
            )));
        }
        if self.assets.concurrent_downloads == 0 {
            return Err(MirrorError::Config(
                "assets.concurrent_downloads must be at least 1".to_string(),
            ));
        }
        Ok(base)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.target.timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.crawler.settle_delay_ms)
    }
}
