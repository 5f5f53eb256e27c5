//! Headless Chromium implementation of [`BrowserSession`] using chromiumoxide.

use crate::error::{Result, ScanError};
use crate::result::{Bucket, ResourceInventory};
use crate::session::{BrowserSession, FormFill};
use anyhow::Context;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const LINKS_SCRIPT: &str = r#"
Array.from(document.querySelectorAll('a[href]')).map(a => a.getAttribute('href'))
"#;

const INVENTORY_SCRIPT: &str = r#"
(() => {
    const out = { stylesheet: [], script: [], image: [], font: [], other: [] };
    document.querySelectorAll('link[rel~="stylesheet"][href]').forEach(l => out.stylesheet.push(l.getAttribute('href')));
    document.querySelectorAll('script[src]').forEach(s => out.script.push(s.getAttribute('src')));
    document.querySelectorAll('img[src]').forEach(i => out.image.push(i.getAttribute('src')));
    const urlPattern = /url\(['"]?([^'")]+)['"]?\)/g;
    document.querySelectorAll('*').forEach(el => {
        const bg = window.getComputedStyle(el).backgroundImage;
        if (bg && bg !== 'none') {
            for (const m of bg.matchAll(urlPattern)) out.image.push(m[1]);
        }
    });
    const fontPattern = /\.(woff2?|ttf|otf|eot)(\?|#|$)/i;
    const imagePattern = /\.(png|jpe?g|gif|svg|webp|ico|avif)(\?|#|$)/i;
    Array.from(document.styleSheets).forEach(sheet => {
        let rules;
        try { rules = sheet.cssRules; } catch (e) { return; }
        Array.from(rules || []).forEach(rule => {
            for (const m of (rule.cssText || '').matchAll(urlPattern)) {
                const ref = m[1];
                if (ref.startsWith('data:')) continue;
                if (fontPattern.test(ref)) out.font.push(ref);
                else if (imagePattern.test(ref)) out.image.push(ref);
                else out.other.push(ref);
            }
        });
    });
    return out;
})()
"#;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawInventory {
    stylesheet: Vec<String>,
    script: Vec<String>,
    image: Vec<String>,
    font: Vec<String>,
    other: Vec<String>,
}

impl From<RawInventory> for ResourceInventory {
    fn from(raw: RawInventory) -> Self {
        let mut inventory = ResourceInventory::new();
        let lists = [
            (Bucket::Stylesheet, raw.stylesheet),
            (Bucket::Script, raw.script),
            (Bucket::Image, raw.image),
            (Bucket::Font, raw.font),
            (Bucket::Other, raw.other),
        ];
        for (bucket, references) in lists {
            for reference in references {
                inventory.insert(bucket, reference);
            }
        }
        inventory
    }
}

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("REPLICA_CHROMIUM_PATH") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }
    let candidates = [
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    ];
    candidates
        .iter()
        .map(PathBuf::from)
        .find(|candidate| candidate.exists())
}

fn browser_error(e: impl std::fmt::Display) -> ScanError {
    ScanError::Browser(e.to_string())
}

pub struct ChromiumSession {
    browser: Browser,
    handler: JoinHandle<()>,
    page: Page,
}

impl ChromiumSession {
    /// Launch a headless Chromium and open a single tab.
    pub async fn launch(user_agent: &str) -> Result<Self> {
        Self::launch_inner(user_agent).await.map_err(browser_error)
    }

    async fn launch_inner(user_agent: &str) -> anyhow::Result<Self> {
        let mut builder = BrowserConfig::builder()
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .window_size(1920, 1080);
        if let Some(path) = find_chromium() {
            builder = builder.chrome_executable(path);
        }
        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    debug!("browser handler event error");
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .context("failed to open a tab")?;
        page.set_user_agent(user_agent)
            .await
            .context("failed to set user agent")?;

        Ok(Self {
            browser,
            handler,
            page,
        })
    }

    async fn evaluate<T: serde::de::DeserializeOwned>(&self, script: &str) -> Result<T> {
        let result = self.page.evaluate(script).await.map_err(browser_error)?;
        result
            .into_value()
            .map_err(|e| ScanError::Browser(format!("failed to decode script result: {e:?}")))
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()> {
        let load = async {
            self.page.goto(url).await?;
            self.page.wait_for_navigation().await?;
            Ok::<_, chromiumoxide::error::CdpError>(())
        };
        match tokio::time::timeout(timeout, load).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ScanError::navigation(url, e)),
            Err(_) => Err(ScanError::navigation(
                url,
                format!("timed out after {}ms", timeout.as_millis()),
            )),
        }
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self
            .page
            .url()
            .await
            .map_err(browser_error)?
            .unwrap_or_default())
    }

    async fn current_markup(&self) -> Result<String> {
        self.page.content().await.map_err(browser_error)
    }

    async fn current_title(&self) -> Result<String> {
        Ok(self
            .page
            .get_title()
            .await
            .map_err(browser_error)?
            .unwrap_or_default())
    }

    async fn link_targets(&self) -> Result<Vec<String>> {
        let links: Vec<Option<String>> = self.evaluate(LINKS_SCRIPT).await?;
        Ok(links.into_iter().flatten().collect())
    }

    async fn resource_inventory(&self) -> Result<ResourceInventory> {
        let raw: RawInventory = self.evaluate(INVENTORY_SCRIPT).await?;
        Ok(raw.into())
    }

    async fn fill_and_submit(&mut self, form: &FormFill) -> Result<bool> {
        let mut username_field = None;
        for selector in &form.username_selectors {
            if let Ok(element) = self.page.find_element(selector.as_str()).await {
                username_field = Some(element);
                break;
            }
        }
        let mut password_field = None;
        for selector in &form.password_selectors {
            if let Ok(element) = self.page.find_element(selector.as_str()).await {
                password_field = Some(element);
                break;
            }
        }
        let (Some(username_field), Some(password_field)) = (username_field, password_field) else {
            return Ok(false);
        };

        username_field
            .click()
            .await
            .map_err(browser_error)?
            .type_str(&form.username)
            .await
            .map_err(browser_error)?;
        password_field
            .click()
            .await
            .map_err(browser_error)?
            .type_str(&form.password)
            .await
            .map_err(browser_error)?;

        for selector in &form.submit_selectors {
            if let Ok(button) = self.page.find_element(selector.as_str()).await {
                button.click().await.map_err(browser_error)?;
                if self.page.wait_for_navigation().await.is_err() {
                    debug!("login submission did not trigger a navigation");
                }
                return Ok(true);
            }
        }

        warn!("Login fields found but no submit control matched");
        Err(ScanError::Browser(
            "login form has no submit control".to_string(),
        ))
    }

    async fn close(&mut self) -> Result<()> {
        self.browser.close().await.map_err(browser_error)?;
        self.handler.abort();
        Ok(())
    }
}
