//! The browser-session capability the pipeline drives.
//!
//! A session holds exactly one active document at a time; discovery and
//! capture reuse the same session sequentially.

use crate::error::Result;
use crate::result::ResourceInventory;
use async_trait::async_trait;
use std::time::Duration;

/// Selectors and values for filling and submitting a login form.
///
/// Each selector list is tried in order and the first match wins.
#[derive(Debug, Clone)]
pub struct FormFill {
    pub username_selectors: Vec<String>,
    pub password_selectors: Vec<String>,
    pub submit_selectors: Vec<String>,
    pub username: String,
    pub password: String,
}

impl FormFill {
    /// Element UI style header login bar.
    pub fn header_login(username: &str, password: &str) -> Self {
        Self {
            username_selectors: vec![".loginBar .el-input__inner".to_string()],
            password_selectors: vec![".loginBar input[type=\"password\"]".to_string()],
            submit_selectors: vec![".loginBar .el-button--primary".to_string()],
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    /// Conventional login form.
    pub fn generic_login(username: &str, password: &str) -> Self {
        Self {
            username_selectors: vec![
                "input[type=\"text\"][name*=\"user\"]".to_string(),
                "input[type=\"text\"][name*=\"login\"]".to_string(),
                "input[type=\"email\"]".to_string(),
                "input[type=\"text\"]".to_string(),
            ],
            password_selectors: vec!["input[type=\"password\"]".to_string()],
            submit_selectors: vec![
                "button[type=\"submit\"]".to_string(),
                "input[type=\"submit\"]".to_string(),
                "button".to_string(),
            ],
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

#[async_trait]
pub trait BrowserSession: Send {
    /// Load `url` and wait for network quiescence, bounded by `timeout`.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()>;

    /// URL of the active document after redirects.
    async fn current_url(&self) -> Result<String>;

    /// Fully rendered markup of the active document.
    async fn current_markup(&self) -> Result<String>;

    async fn current_title(&self) -> Result<String>;

    /// Raw `href` values of every anchor in the active document.
    async fn link_targets(&self) -> Result<Vec<String>>;

    /// Resources referenced by the active document.
    async fn resource_inventory(&self) -> Result<ResourceInventory>;

    /// Fill and submit a form. Returns `Ok(false)` when no matching form exists.
    async fn fill_and_submit(&mut self, form: &FormFill) -> Result<bool>;

    async fn close(&mut self) -> Result<()>;
}
