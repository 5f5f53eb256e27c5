// Scripted browser session shared by the scanner integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use replica_scanner::error::{Result, ScanError};
use replica_scanner::{BrowserSession, FormFill, ResourceInventory};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

#[derive(Clone, Default)]
pub struct ScriptedPage {
    pub html: String,
    pub title: String,
    pub links: Vec<String>,
    pub resources: ResourceInventory,
    pub has_login_form: bool,
}

impl ScriptedPage {
    pub fn with_links(links: &[&str]) -> Self {
        Self {
            html: format!("<html><body>{} links</body></html>", links.len()),
            links: links.iter().map(|l| l.to_string()).collect(),
            ..Default::default()
        }
    }
}

/// A session serving canned pages. URLs listed in `failing` fail to navigate.
#[derive(Default)]
pub struct ScriptedSession {
    pub pages: HashMap<String, ScriptedPage>,
    pub failing: HashSet<String>,
    pub navigations: Vec<String>,
    pub submissions: Vec<FormFill>,
    pub closed: bool,
    current: Option<String>,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, page: ScriptedPage) -> Self {
        self.pages.insert(url.to_string(), page);
        self
    }

    pub fn failing(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    pub fn navigation_count(&self, url: &str) -> usize {
        self.navigations.iter().filter(|u| *u == url).count()
    }

    fn current_page(&self) -> Result<&ScriptedPage> {
        self.current
            .as_ref()
            .and_then(|url| self.pages.get(url))
            .ok_or_else(|| ScanError::Other("no document loaded".to_string()))
    }
}

#[async_trait]
impl BrowserSession for ScriptedSession {
    async fn navigate(&mut self, url: &str, _timeout: Duration) -> Result<()> {
        self.navigations.push(url.to_string());
        if self.failing.contains(url) || !self.pages.contains_key(url) {
            self.current = None;
            return Err(ScanError::navigation(url, "timed out"));
        }
        self.current = Some(url.to_string());
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        self.current
            .clone()
            .ok_or_else(|| ScanError::Other("no document loaded".to_string()))
    }

    async fn current_markup(&self) -> Result<String> {
        Ok(self.current_page()?.html.clone())
    }

    async fn current_title(&self) -> Result<String> {
        Ok(self.current_page()?.title.clone())
    }

    async fn link_targets(&self) -> Result<Vec<String>> {
        Ok(self.current_page()?.links.clone())
    }

    async fn resource_inventory(&self) -> Result<ResourceInventory> {
        Ok(self.current_page()?.resources.clone())
    }

    async fn fill_and_submit(&mut self, form: &FormFill) -> Result<bool> {
        if !self.current_page()?.has_login_form {
            return Ok(false);
        }
        self.submissions.push(form.clone());
        Ok(true)
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.current = None;
        Ok(())
    }
}
