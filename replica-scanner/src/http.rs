//! Static HTTP implementation of [`BrowserSession`].
//!
//! Pages are fetched with `reqwest` and queried with `scraper`. No script
//! runs, so client-rendered content is invisible to this session; it is the
//! engine of choice for server-rendered sites and for tests.

use crate::error::{Result, ScanError};
use crate::result::{Bucket, ResourceInventory};
use crate::session::{BrowserSession, FormFill};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const DEFAULT_USER_AGENT: &str = "Replica/0.1 (+https://github.com/replica-mirror/replica)";

static STYLESHEET_LINKS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("link[rel~=\"stylesheet\"][href]").unwrap());
static SCRIPTS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("script[src]").unwrap());
static IMAGES: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img[src]").unwrap());
static STYLED: LazyLock<Selector> = LazyLock::new(|| Selector::parse("[style]").unwrap());
static STYLE_BLOCKS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("style").unwrap());
static ANCHORS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());
static FORM_FIELDS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("input[name], select[name], textarea[name]").unwrap());

static BACKGROUND_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)background(?:-image)?\s*:[^;]*?url\(\s*['"]?([^'")]+?)['"]?\s*\)"#).unwrap()
});
static CSS_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)url\(\s*['"]?([^'")]+?)['"]?\s*\)"#).unwrap());

struct LoadedPage {
    url: String,
    body: String,
}

pub struct HttpSession {
    client: Client,
    current: Option<LoadedPage>,
}

impl HttpSession {
    pub fn new() -> Result<Self> {
        Self::with_user_agent(DEFAULT_USER_AGENT)
    }

    pub fn with_user_agent(user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .cookie_store(true)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self {
            client,
            current: None,
        })
    }

    fn page(&self) -> Result<&LoadedPage> {
        self.current
            .as_ref()
            .ok_or_else(|| ScanError::Other("no document loaded".to_string()))
    }

    fn document(&self) -> Result<Html> {
        Ok(Html::parse_document(&self.page()?.body))
    }

    /// Send `request` and make an HTML response the current document. With
    /// `require_html` unset, a successful non-HTML response is accepted and
    /// the current document is left as it was.
    async fn load(
        &mut self,
        request: reqwest::RequestBuilder,
        url: &str,
        require_html: bool,
    ) -> Result<()> {
        let response = request
            .send()
            .await
            .map_err(|e| ScanError::navigation(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScanError::navigation(url, format!("HTTP status {}", status)));
        }

        let is_html = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("text/html") || ct.contains("application/xhtml"))
            .unwrap_or(true);
        if !is_html {
            if require_html {
                return Err(ScanError::navigation(url, "response is not an HTML document"));
            }
            debug!("{} answered {} with a non-HTML body", url, status);
            return Ok(());
        }

        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| ScanError::navigation(url, e))?;

        debug!("Loaded {} ({} bytes)", final_url, body.len());
        self.current = Some(LoadedPage {
            url: final_url,
            body,
        });
        Ok(())
    }
}

/// Build the resource inventory of a static document.
pub fn inventory_from_markup(html: &str) -> ResourceInventory {
    let document = Html::parse_document(html);
    let mut inventory = ResourceInventory::new();

    for element in document.select(&STYLESHEET_LINKS) {
        if let Some(href) = element.value().attr("href") {
            inventory.insert(Bucket::Stylesheet, href);
        }
    }
    for element in document.select(&SCRIPTS) {
        if let Some(src) = element.value().attr("src") {
            inventory.insert(Bucket::Script, src);
        }
    }
    for element in document.select(&IMAGES) {
        if let Some(src) = element.value().attr("src") {
            inventory.insert(Bucket::Image, src);
        }
    }
    for element in document.select(&STYLED) {
        if let Some(style) = element.value().attr("style") {
            for caps in BACKGROUND_IMAGE.captures_iter(style) {
                inventory.insert(Bucket::Image, &caps[1]);
            }
        }
    }
    for element in document.select(&STYLE_BLOCKS) {
        let css: String = element.text().collect();
        for caps in CSS_URL.captures_iter(&css) {
            let reference = &caps[1];
            inventory.insert(Bucket::classify_stylesheet_reference(reference), reference);
        }
    }

    inventory
}

fn first_match<'a>(scope: ElementRef<'a>, selectors: &[String]) -> Result<Option<ElementRef<'a>>> {
    for raw in selectors {
        let selector = Selector::parse(raw)
            .map_err(|e| ScanError::Other(format!("invalid selector '{}': {:?}", raw, e)))?;
        if let Some(found) = scope.select(&selector).next() {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

fn enclosing_form(element: ElementRef<'_>) -> Option<ElementRef<'_>> {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|ancestor| ancestor.value().name() == "form")
}

#[async_trait]
impl BrowserSession for HttpSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()> {
        let request = self.client.get(url).timeout(timeout);
        self.load(request, url, true).await
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.page()?.url.clone())
    }

    async fn current_markup(&self) -> Result<String> {
        Ok(self.page()?.body.clone())
    }

    async fn current_title(&self) -> Result<String> {
        let document = self.document()?;
        Ok(document
            .select(&TITLE)
            .next()
            .map(|t| t.text().collect::<String>().trim().to_string())
            .unwrap_or_default())
    }

    async fn link_targets(&self) -> Result<Vec<String>> {
        let document = self.document()?;
        Ok(document
            .select(&ANCHORS)
            .filter_map(|a| a.value().attr("href"))
            .map(|href| href.to_string())
            .collect())
    }

    async fn resource_inventory(&self) -> Result<ResourceInventory> {
        Ok(inventory_from_markup(&self.page()?.body))
    }

    async fn fill_and_submit(&mut self, form: &FormFill) -> Result<bool> {
        let (target, method, fields) = {
            let page = self.page()?;
            let document = Html::parse_document(&page.body);
            let root = document.root_element();

            let Some(password) = first_match(root, &form.password_selectors)? else {
                return Ok(false);
            };
            let Some(form_element) = enclosing_form(password) else {
                debug!("Password field is not inside a form; nothing to submit");
                return Ok(false);
            };
            let Some(username) = first_match(form_element, &form.username_selectors)?
                .filter(|u| u.id() != password.id())
            else {
                return Ok(false);
            };

            let username_name = username.value().attr("name").unwrap_or("username");
            let password_name = password.value().attr("name").unwrap_or("password");

            let mut fields: Vec<(String, String)> = Vec::new();
            for field in form_element.select(&FORM_FIELDS) {
                let value = field.value();
                let Some(name) = value.attr("name") else {
                    continue;
                };
                let kind = value.attr("type").unwrap_or("text").to_ascii_lowercase();
                if matches!(kind.as_str(), "submit" | "button" | "image" | "reset") {
                    continue;
                }
                if name == username_name || name == password_name {
                    continue;
                }
                fields.push((name.to_string(), value.attr("value").unwrap_or("").to_string()));
            }
            fields.push((username_name.to_string(), form.username.clone()));
            fields.push((password_name.to_string(), form.password.clone()));

            let base = Url::parse(&page.url).map_err(|e| ScanError::InvalidUrl(e.to_string()))?;
            let action = form_element.value().attr("action").unwrap_or("");
            let target = base
                .join(action)
                .map_err(|e| ScanError::InvalidUrl(format!("form action '{}': {}", action, e)))?;
            let method = form_element
                .value()
                .attr("method")
                .unwrap_or("get")
                .to_ascii_lowercase();

            (target, method, fields)
        };

        debug!("Submitting login form to {} ({})", target, method);
        let request = if method == "post" {
            self.client.post(target.clone()).form(&fields)
        } else {
            self.client.get(target.clone()).query(&fields)
        };
        self.load(request, target.as_str(), false).await?;
        Ok(true)
    }

    async fn close(&mut self) -> Result<()> {
        self.current = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_string_contains, method, path},
    };

    fn html(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("content-type", "text/html")
            .set_body_bytes(body.as_bytes().to_vec())
    }

    #[test]
    fn test_inventory_from_markup() {
        let markup = r#"<html><head>
            <link rel="stylesheet" href="/css/main.css">
            <link rel="icon" href="/favicon.ico">
            <script src="/js/app.js"></script>
            <style>@font-face { src: url('/fonts/f.woff2'); } .x { background: url(/img/bg.jpg) }</style>
            </head><body>
            <img src="/img/a.png">
            <div style="background-image: url('/img/hero.webp')"></div>
            </body></html>"#;

        let inventory = inventory_from_markup(markup);
        assert_eq!(inventory.get(Bucket::Stylesheet), ["/css/main.css"]);
        assert_eq!(inventory.get(Bucket::Script), ["/js/app.js"]);
        assert_eq!(
            inventory.get(Bucket::Image),
            ["/img/a.png", "/img/hero.webp", "/img/bg.jpg"]
        );
        assert_eq!(inventory.get(Bucket::Font), ["/fonts/f.woff2"]);
        assert!(!inventory.contains("/favicon.ico"));
    }

    #[tokio::test]
    async fn test_navigate_reads_markup_title_and_links() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(html(
                r#"<html><head><title> Home </title></head>
                <body><a href="/about">About</a><a href="mailto:x@y.z">Mail</a></body></html>"#,
            ))
            .mount(&mock_server)
            .await;

        let mut session = HttpSession::new().unwrap();
        session
            .navigate(&mock_server.uri(), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(session.current_title().await.unwrap(), "Home");
        assert_eq!(
            session.link_targets().await.unwrap(),
            vec!["/about".to_string(), "mailto:x@y.z".to_string()]
        );
        assert!(session.current_markup().await.unwrap().contains("About"));
    }

    #[tokio::test]
    async fn test_navigate_rejects_error_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let mut session = HttpSession::new().unwrap();
        let err = session
            .navigate(&format!("{}/missing", mock_server.uri()), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Navigation { .. }));
    }

    #[tokio::test]
    async fn test_navigate_times_out() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(html("<html></html>").set_delay(Duration::from_millis(500)))
            .mount(&mock_server)
            .await;

        let mut session = HttpSession::new().unwrap();
        let result = session
            .navigate(&format!("{}/slow", mock_server.uri()), Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(ScanError::Navigation { .. })));
    }

    #[tokio::test]
    async fn test_fill_and_submit_posts_form_with_hidden_fields() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(html(
                r#"<html><body><form action="/session" method="post">
                    <input type="hidden" name="token" value="abc">
                    <input type="text" name="user_name">
                    <input type="password" name="pass">
                    <button type="submit">Sign in</button>
                </form></body></html>"#,
            ))
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/session"))
            .and(body_string_contains("token=abc"))
            .and(body_string_contains("user_name=alice"))
            .and(body_string_contains("pass=secret"))
            .respond_with(html("<html><title>Welcome</title></html>"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut session = HttpSession::new().unwrap();
        session
            .navigate(&format!("{}/login", mock_server.uri()), Duration::from_secs(5))
            .await
            .unwrap();

        let submitted = session
            .fill_and_submit(&FormFill::generic_login("alice", "secret"))
            .await
            .unwrap();
        assert!(submitted);
        assert_eq!(session.current_title().await.unwrap(), "Welcome");
    }

    #[tokio::test]
    async fn test_fill_and_submit_accepts_json_response() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(html(
                r#"<html><title>Sign in</title><body><form action="/api/login" method="post">
                    <input type="email" name="email">
                    <input type="password" name="password">
                </form></body></html>"#,
            ))
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/login"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                br#"{"success":true}"#.to_vec(),
                "application/json",
            ))
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut session = HttpSession::new().unwrap();
        session
            .navigate(&format!("{}/login", mock_server.uri()), Duration::from_secs(5))
            .await
            .unwrap();

        let submitted = session
            .fill_and_submit(&FormFill::generic_login("alice@site.test", "secret"))
            .await
            .unwrap();
        assert!(submitted);
        assert_eq!(session.current_title().await.unwrap(), "Sign in");
    }

    #[tokio::test]
    async fn test_fill_and_submit_without_form() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(html("<html><body><p>No login here</p></body></html>"))
            .mount(&mock_server)
            .await;

        let mut session = HttpSession::new().unwrap();
        session
            .navigate(&mock_server.uri(), Duration::from_secs(5))
            .await
            .unwrap();

        let submitted = session
            .fill_and_submit(&FormFill::header_login("alice", "secret"))
            .await
            .unwrap();
        assert!(!submitted);
    }
}
