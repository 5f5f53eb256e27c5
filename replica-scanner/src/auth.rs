use crate::error::{Result, ScanError};
use crate::session::{BrowserSession, FormFill};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// Outcome of an authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// A login form was found and submitted.
    Submitted,
    /// No login form exists on the base page or on `/login`.
    NoLoginForm,
}

/// Log the session in before discovery.
///
/// Navigation to the base URL must succeed and a login form that is found
/// must submit; both are errors. A site without any login form is not.
pub async fn authenticate(
    session: &mut dyn BrowserSession,
    base_url: &str,
    username: &str,
    password: &str,
    timeout: Duration,
) -> Result<AuthOutcome> {
    info!("Authenticating as {}", username);

    session.navigate(base_url, timeout).await?;
    let attempts = [
        FormFill::header_login(username, password),
        FormFill::generic_login(username, password),
    ];
    for form in &attempts {
        if session.fill_and_submit(form).await? {
            info!("Login form submitted on {}", base_url);
            return Ok(AuthOutcome::Submitted);
        }
    }

    let login_url = Url::parse(base_url)
        .and_then(|base| base.join("/login"))
        .map_err(|e| ScanError::InvalidUrl(format!("{}: {}", base_url, e)))?;
    info!("No login form on the base page, trying {}", login_url);

    if let Err(e) = session.navigate(login_url.as_str(), timeout).await {
        warn!("No login page found either, continuing without authentication: {}", e);
        return Ok(AuthOutcome::NoLoginForm);
    }
    if session
        .fill_and_submit(&FormFill::generic_login(username, password))
        .await?
    {
        info!("Login form submitted on {}", login_url);
        return Ok(AuthOutcome::Submitted);
    }

    warn!("No login form found, continuing without authentication");
    Ok(AuthOutcome::NoLoginForm)
}
