// Rewrites captured markup so it only references the local mirror

use crate::assets::{AssetMap, relative_path};
use crate::error::MirrorError;
use crate::markup::{self, BACKGROUND_URL, CSS_URL, Edit, StartTag};
use crate::persist::page_output_path;
use regex::Captures;
use replica_scanner::PageRecord;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use tracing::{Span, debug, info_span, warn};
use url::Url;

static FORM_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("form").unwrap());
static INPUT_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("input").unwrap());

/// Marker id of the injected script; its presence makes injection a no-op.
pub const AUTH_SCRIPT_ID: &str = "replica-auth-check";
pub const AUTH_STYLE_ID: &str = "replica-auth-style";

pub const LOGIN_ENDPOINT: &str = "auth/login";
pub const REGISTER_ENDPOINT: &str = "auth/register";
pub const CSRF_FIELD: &str = "csrf_token";

const AUTH_SCRIPT: &str = r#"(function () {
  var root = '__AUTH_ROOT__';
  function apply(state) {
    var authed = !!(state && state.authenticated);
    if (document.body) {
      document.body.classList.toggle('authenticated', authed);
      document.body.classList.toggle('not-authenticated', !authed);
    }
    document.querySelectorAll('.protected, .auth-required').forEach(function (el) {
      el.style.display = authed ? '' : 'none';
    });
    document.querySelectorAll('.login-only').forEach(function (el) {
      el.style.display = authed ? 'none' : '';
    });
    if (authed && state.username) {
      document.querySelectorAll('.username, .user-name, [data-username]').forEach(function (el) {
        el.textContent = state.username;
      });
    }
    if (state && state.csrf_token) {
      document.querySelectorAll('input[name="csrf_token"]').forEach(function (el) {
        el.value = state.csrf_token;
      });
    }
    if (authed) {
      document.querySelectorAll('a[href*="login"]').forEach(function (el) {
        el.setAttribute('href', root + 'auth/logout');
        el.textContent = 'Logout';
      });
    }
  }
  function check() {
    fetch(root + 'auth/session', { credentials: 'same-origin' })
      .then(function (response) { return response.json(); })
      .then(apply)
      .catch(function () { apply(null); });
  }
  if (document.readyState === 'loading') {
    document.addEventListener('DOMContentLoaded', check);
  } else {
    check();
  }
})();"#;

const AUTH_STYLE: &str = "body.not-authenticated .protected,\n\
body.not-authenticated .auth-required { display: none !important; }\n\
body.authenticated .login-only { display: none !important; }";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormKind {
    Login,
    Register,
    Other,
}

#[derive(Debug, Clone, Default)]
pub struct RewriteOutcome {
    pub html: String,
    /// Asset references pointed at local files.
    pub references: usize,
    pub login_forms: usize,
    pub register_forms: usize,
    pub injected: bool,
}

/// Applies asset relocation, form redirection and auth script injection to
/// one page at a time. Paths are made relative to the page's own output
/// location so nested pages resolve the bucket directories correctly.
pub struct PathRewriter {
    base_url: Url,
    span: Span,
}

impl PathRewriter {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            span: info_span!("rewrite"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn rewrite(&self, page: &PageRecord, assets: &AssetMap) -> RewriteOutcome {
        let _entered = self.span.enter();
        let output_path = page_output_path(&page.url, &self.base_url);
        let page_dir = output_path.rsplit_once('/').map_or("", |(dir, _)| dir);
        let outcome = rewrite_markup(&page.html, page_dir, assets);
        debug!(
            "{} -> {}: {} references, {} login forms, {} register forms",
            page.url, output_path, outcome.references, outcome.login_forms, outcome.register_forms
        );
        outcome
    }
}

/// Classify every form in document order.
pub fn classify_forms(html: &str) -> Vec<FormKind> {
    let document = Html::parse_document(html);
    document.select(&FORM_SELECTOR).map(classify_form).collect()
}

fn classify_form(form: ElementRef<'_>) -> FormKind {
    let mut has_password = false;
    let mut has_username = false;
    let mut has_confirm = false;

    for input in form.select(&INPUT_SELECTOR) {
        let element = input.value();
        let kind = element.attr("type").unwrap_or("text").to_ascii_lowercase();
        let name = format!(
            "{} {}",
            element.attr("name").unwrap_or(""),
            element.attr("id").unwrap_or("")
        )
        .to_ascii_lowercase();

        if name.contains("confirm") || name.contains("repeat") {
            has_confirm = true;
        }
        if kind == "password" {
            has_password = true;
        } else if kind == "email"
            || ["user", "login", "email"].iter().any(|k| name.contains(k))
        {
            has_username = true;
        }
    }

    match (has_password, has_confirm, has_username) {
        (true, true, _) => FormKind::Register,
        (true, false, true) => FormKind::Login,
        _ => FormKind::Other,
    }
}

/// Rewrite one document. `page_dir` is the page's directory relative to the
/// mirror root (empty for top-level pages).
pub fn rewrite_markup(html: &str, page_dir: &str, assets: &AssetMap) -> RewriteOutcome {
    let mut outcome = RewriteOutcome::default();
    let tags = markup::start_tags(html);
    let lower = html.to_ascii_lowercase();
    let local = |reference: &str| {
        assets
            .get(reference.trim())
            .map(|path| relative_path(page_dir, path))
    };

    let form_kinds = classify_forms(html);
    let form_tags = tags.iter().filter(|t| t.name == "form").count();
    let forms_aligned = form_kinds.len() == form_tags;
    if !forms_aligned {
        let e = MirrorError::rewrite(
            "forms",
            format!(
                "document tree has {} forms but markup has {}",
                form_kinds.len(),
                form_tags
            ),
        );
        warn!("{}, leaving forms untouched", e);
    }

    let mut edits = Vec::new();
    let mut form_index = 0;

    for tag in &tags {
        let mut edited = tag.clone();
        let mut changed = false;

        match tag.name.as_str() {
            "link" => {
                if let Some(path) = tag.attr("href").and_then(local) {
                    edited.set_attr("href", &path);
                    outcome.references += 1;
                    changed = true;
                }
            }
            "script" | "img" => {
                if let Some(path) = tag.attr("src").and_then(local) {
                    edited.set_attr("src", &path);
                    outcome.references += 1;
                    changed = true;
                }
            }
            "form" => {
                let kind = form_kinds.get(form_index).copied().unwrap_or(FormKind::Other);
                form_index += 1;
                if forms_aligned && kind != FormKind::Other {
                    let endpoint = match kind {
                        FormKind::Register => {
                            outcome.register_forms += 1;
                            REGISTER_ENDPOINT
                        }
                        _ => {
                            outcome.login_forms += 1;
                            LOGIN_ENDPOINT
                        }
                    };
                    edited.set_attr("action", &relative_path(page_dir, endpoint));
                    edited.set_attr("method", "POST");
                    changed = true;
                    if let Some(edit) = csrf_insertion(tag, &tags, &lower) {
                        edits.push(edit);
                    }
                }
            }
            "style" => {
                if let Some(ref range) = tag.raw_text {
                    let css = &html[range.clone()];
                    let mut count = 0;
                    let rewritten = CSS_URL.replace_all(css, |caps: &Captures| match local(&caps[1]) {
                        Some(path) => {
                            count += 1;
                            format!("url('{}')", path)
                        }
                        None => caps[0].to_string(),
                    });
                    if count > 0 {
                        outcome.references += count;
                        edits.push(Edit {
                            range: range.clone(),
                            replacement: rewritten.into_owned(),
                        });
                    }
                }
            }
            _ => {}
        }

        if let Some(style) = tag.attr("style") {
            let mut count = 0;
            let rewritten = BACKGROUND_URL.replace_all(style, |caps: &Captures| match local(&caps[2]) {
                Some(path) => {
                    count += 1;
                    format!("{}{}{}", &caps[1], path, &caps[3])
                }
                None => caps[0].to_string(),
            });
            if count > 0 {
                let rewritten = rewritten.into_owned();
                edited.set_attr("style", &rewritten);
                outcome.references += count;
                changed = true;
            }
        }

        if changed {
            edits.push(Edit {
                range: tag.span.clone(),
                replacement: edited.to_markup(),
            });
        }
    }

    if let Some(edit) = auth_injection(html, &lower, page_dir) {
        edits.push(edit);
        outcome.injected = true;
    }

    outcome.html = markup::apply_edits(html, edits);
    outcome
}

/// Hidden CSRF input placed just before the form's closing tag, unless the
/// form already carries one.
fn csrf_insertion(form: &StartTag, tags: &[StartTag], lower: &str) -> Option<Edit> {
    let close = form.span.end + lower[form.span.end..].find("</form")?;
    let already_present = tags.iter().any(|t| {
        t.span.start > form.span.end
            && t.span.start < close
            && t.name == "input"
            && t.attr("name") == Some(CSRF_FIELD)
    });
    if already_present {
        return None;
    }
    Some(Edit {
        range: close..close,
        replacement: format!(r#"<input type="hidden" name="{}" value="">"#, CSRF_FIELD),
    })
}

fn auth_injection(html: &str, lower: &str, page_dir: &str) -> Option<Edit> {
    if html.contains(AUTH_SCRIPT_ID) {
        return None;
    }

    let root = relative_path(page_dir, "");
    let root = if root.is_empty() { String::new() } else { format!("{}/", root) };
    let block = format!(
        "<style id=\"{}\">\n{}\n</style>\n<script id=\"{}\">\n{}\n</script>\n",
        AUTH_STYLE_ID,
        AUTH_STYLE,
        AUTH_SCRIPT_ID,
        AUTH_SCRIPT.replace("__AUTH_ROOT__", &root)
    );

    let at = match lower.find("</head") {
        Some(pos) => pos,
        None => markup::start_tags(html)
            .into_iter()
            .find(|t| t.name == "body")
            .map_or(0, |t| t.span.end),
    };
    Some(Edit {
        range: at..at,
        replacement: block,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetRecord;
    use replica_scanner::Bucket;

    fn map(entries: &[(&str, &str)]) -> AssetMap {
        let mut map = AssetMap::new();
        for (raw, local) in entries {
            map.insert(
                *raw,
                AssetRecord {
                    local_path: local.to_string(),
                    bucket: Bucket::Other,
                    source_url: format!("https://site.test{}", raw),
                },
            );
        }
        map
    }

    #[test]
    fn test_asset_references_are_replaced() {
        let html = r#"<html><head><link rel="stylesheet" href="/css/main.css"><script src="/js/app.js"></script></head><body><img src="/img/a.png" alt="a"><img src="https://cdn.test/missing.png"></body></html>"#;
        let assets = map(&[
            ("/css/main.css", "css/main.css"),
            ("/js/app.js", "js/app.js"),
            ("/img/a.png", "images/a.png"),
        ]);

        let outcome = rewrite_markup(html, "", &assets);
        assert_eq!(outcome.references, 3);
        assert!(outcome.html.contains(r#"<link rel="stylesheet" href="css/main.css">"#));
        assert!(outcome.html.contains(r#"<script src="js/app.js">"#));
        assert!(outcome.html.contains(r#"<img src="images/a.png" alt="a">"#));
        assert!(outcome.html.contains(r#"<img src="https://cdn.test/missing.png">"#));
    }

    #[test]
    fn test_nested_page_gets_relative_paths() {
        let html = r#"<html><head></head><body><img src="/img/a.png"></body></html>"#;
        let assets = map(&[("/img/a.png", "images/a.png")]);

        let outcome = rewrite_markup(html, "docs", &assets);
        assert!(outcome.html.contains(r#"<img src="../images/a.png">"#));
        assert!(outcome.html.contains("var root = '../';"));
    }

    #[test]
    fn test_inline_background_image() {
        let html = r#"<div class="hero" style="color: red; background-image: url(&quot;/img/hero.jpg&quot;)">x</div><p style="background-image: url(/img/other.jpg)">y</p>"#;
        let assets = map(&[("/img/hero.jpg", "images/hero.jpg")]);

        let outcome = rewrite_markup(html, "", &assets);
        assert_eq!(outcome.references, 1);
        assert!(outcome.html.contains(
            r#"<div class="hero" style="color: red; background-image: url(&quot;images/hero.jpg&quot;)">"#
        ));
        assert!(outcome.html.contains(r#"<p style="background-image: url(/img/other.jpg)">"#));
    }

    #[test]
    fn test_style_block_urls() {
        let html = "<html><head><style>@font-face { src: url(\"/fonts/f.woff2\") }</style></head></html>";
        let assets = map(&[("/fonts/f.woff2", "fonts/f.woff2")]);

        let outcome = rewrite_markup(html, "", &assets);
        assert!(outcome.html.contains("src: url('fonts/f.woff2')"));
    }

    #[test]
    fn test_login_form_is_redirected() {
        let html = r#"<html><head></head><body><form action="/session" method="get"><input type="email" name="mail"><input type="password" name="pw"><button>Go</button></form></body></html>"#;

        let outcome = rewrite_markup(html, "", &AssetMap::new());
        assert_eq!(outcome.login_forms, 1);
        assert!(outcome.html.contains(r#"<form action="auth/login" method="POST">"#));
        assert!(outcome
            .html
            .contains(r#"<button>Go</button><input type="hidden" name="csrf_token" value=""></form>"#));
    }

    #[test]
    fn test_register_form_takes_precedence() {
        let html = r#"<form action="/signup"><input type="text" name="username"><input type="password" name="password"><input type="password" name="confirm_password"></form>"#;

        let outcome = rewrite_markup(html, "", &AssetMap::new());
        assert_eq!(outcome.register_forms, 1);
        assert_eq!(outcome.login_forms, 0);
        assert!(outcome.html.contains(r#"<form action="auth/register" method="POST">"#));
    }

    #[test]
    fn test_other_forms_are_untouched() {
        let html = r#"<form action="/search"><input type="text" name="q"></form>"#;
        let outcome = rewrite_markup(html, "", &AssetMap::new());
        assert!(outcome.html.contains(r#"<form action="/search"><input type="text" name="q"></form>"#));
        assert_eq!(classify_forms(html), vec![FormKind::Other]);
    }

    #[test]
    fn test_existing_csrf_field_is_not_duplicated() {
        let html = r#"<form><input name="user"><input type="password"><input type="hidden" name="csrf_token" value="x"></form>"#;
        let outcome = rewrite_markup(html, "", &AssetMap::new());
        assert_eq!(outcome.login_forms, 1);
        assert!(outcome.html.contains(r#"name="csrf_token" value="x""#));
        assert!(!outcome.html.contains(r#"name="csrf_token" value="""#));
    }

    #[test]
    fn test_injection_is_idempotent() {
        let html = "<html><head><title>t</title></head><body></body></html>";
        let first = rewrite_markup(html, "", &AssetMap::new());
        assert!(first.injected);
        assert!(first.html.contains(AUTH_SCRIPT_ID));
        assert!(first.html.contains("auth/session"));
        let head_close = first.html.find("</head>").unwrap();
        assert!(first.html.find(AUTH_SCRIPT_ID).unwrap() < head_close);

        let second = rewrite_markup(&first.html, "", &AssetMap::new());
        assert!(!second.injected);
        assert_eq!(second.html, first.html);
    }

    #[test]
    fn test_untouched_markup_is_byte_identical() {
        let html = "<html><head><!-- c --></head><body><P CLASS='x'>Hi &amp; bye</P></body></html>";
        let outcome = rewrite_markup(html, "", &AssetMap::new());
        let without_injection = outcome.html.replace(
            &outcome.html[outcome.html.find("<style id=").unwrap()..outcome.html.find("</head>").unwrap()],
            "",
        );
        assert_eq!(without_injection, html);
    }
}
