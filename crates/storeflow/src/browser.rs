//! Chromium session provider over CDP.
//!
//! Implements [`Session`] on a chromiumoxide page. Element handles returned
//! by `find_elements` are registered under generated ids so later calls can
//! address the same DOM node. Re-running a query drops the handles of its
//! previous run, and a navigation drops every registered handle, so polling
//! keeps the registry bounded.

use crate::config::SuiteConfig;
use crate::error::{SessionError, SessionResult};
use crate::locator::Selector;
use crate::session::{ElementHandle, Interaction, Session};
use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, CaptureScreenshotParams};
use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Launch settings for [`ChromiumSession`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSettings {
    /// Browser identity (`chrome`, `chromium` or `edge`)
    pub browser: String,
    /// Run without a window
    pub headless: bool,
    /// Keep the Chromium sandbox
    pub sandbox: bool,
    /// Explicit browser executable
    pub executable: Option<PathBuf>,
    /// Where downloads are saved
    pub download_dir: Option<PathBuf>,
    /// Window size
    pub window: (u32, u32),
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            browser: "chrome".to_string(),
            headless: true,
            sandbox: true,
            executable: None,
            download_dir: None,
            window: (1920, 1080),
        }
    }
}

impl LaunchSettings {
    /// Set the download directory
    #[must_use]
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = Some(dir.into());
        self
    }

    /// Run with a visible window
    #[must_use]
    pub const fn headed(mut self) -> Self {
        self.headless = false;
        self
    }

    /// Disable the sandbox (containers)
    #[must_use]
    pub const fn no_sandbox(mut self) -> Self {
        self.sandbox = false;
        self
    }
}

impl From<&SuiteConfig> for LaunchSettings {
    fn from(config: &SuiteConfig) -> Self {
        Self {
            browser: config.browser.clone(),
            ..Self::default()
        }
        .with_download_dir(&config.download.dir)
    }
}

#[derive(Debug, Deserialize)]
struct ElementInfo {
    tag: String,
    text: String,
    visible: bool,
    enabled: bool,
}

const ELEMENT_INFO_FN: &str = "function() { \
    const r = this.getBoundingClientRect(); \
    const s = window.getComputedStyle(this); \
    return JSON.stringify({ \
        tag: this.tagName.toLowerCase(), \
        text: (this.innerText || this.textContent || '').trim(), \
        visible: r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none', \
        enabled: !this.disabled \
    }); }";

fn cdp_error(err: impl std::fmt::Display) -> SessionError {
    SessionError::other(err.to_string())
}

const CONNECTION_LOST: [&str; 6] = [
    "websocket",
    "channel",
    "connection",
    "no response",
    "browser closed",
    "target closed",
];

const NODE_MISSING: [&str; 4] = [
    "could not find node",
    "no node",
    "node with given id",
    "cannot find context",
];

/// Map a CDP failure during element work onto the session taxonomy.
///
/// A lost connection is `Closed` so polling stops at once; a node that went
/// away becomes `missing`; anything else is `Other`.
fn classify(message: &str, missing: SessionError) -> SessionError {
    let lower = message.to_lowercase();
    if CONNECTION_LOST.iter().any(|m| lower.contains(m)) {
        SessionError::Closed
    } else if NODE_MISSING.iter().any(|m| lower.contains(m)) {
        missing
    } else {
        SessionError::other(message)
    }
}

/// Live element handles, grouped by the query that produced them
#[derive(Debug)]
struct HandleRegistry<T> {
    nodes: HashMap<String, T>,
    by_query: HashMap<String, Vec<String>>,
}

impl<T> Default for HandleRegistry<T> {
    fn default() -> Self {
        Self {
            nodes: HashMap::new(),
            by_query: HashMap::new(),
        }
    }
}

impl<T> HandleRegistry<T> {
    /// Forget the handles an earlier run of `query` registered
    fn retire(&mut self, query: &str) {
        for id in self.by_query.remove(query).unwrap_or_default() {
            self.nodes.remove(&id);
        }
    }

    fn insert(&mut self, query: &str, id: String, node: T) {
        self.by_query
            .entry(query.to_string())
            .or_default()
            .push(id.clone());
        self.nodes.insert(id, node);
    }

    fn get(&self, id: &str) -> Option<&T> {
        self.nodes.get(id)
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.by_query.clear();
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }
}

/// A live Chromium page
#[derive(Debug)]
pub struct ChromiumSession {
    browser: Mutex<Browser>,
    page: Page,
    elements: Mutex<HandleRegistry<Element>>,
    next_id: AtomicU64,
    handler: tokio::task::JoinHandle<()>,
}

impl ChromiumSession {
    /// Launch a browser and open a blank page
    pub async fn launch(settings: &LaunchSettings) -> SessionResult<Self> {
        if !matches!(settings.browser.as_str(), "chrome" | "chromium" | "edge") {
            return Err(SessionError::other(format!(
                "unsupported browser: {}",
                settings.browser
            )));
        }
        let mut builder = BrowserConfig::builder().window_size(settings.window.0, settings.window.1);
        if !settings.headless {
            builder = builder.with_head();
        }
        if !settings.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(path) = &settings.executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(SessionError::other)?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(cdp_error)?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser.new_page("about:blank").await.map_err(cdp_error)?;
        if let Some(dir) = &settings.download_dir {
            std::fs::create_dir_all(dir).map_err(cdp_error)?;
            let params = SetDownloadBehaviorParams::builder()
                .behavior(SetDownloadBehaviorBehavior::Allow)
                .download_path(dir.display().to_string())
                .build()
                .map_err(SessionError::other)?;
            page.execute(params).await.map_err(cdp_error)?;
        }
        info!(browser = %settings.browser, headless = settings.headless, "browser session launched");

        Ok(Self {
            browser: Mutex::new(browser),
            page,
            elements: Mutex::new(HandleRegistry::default()),
            next_id: AtomicU64::new(1),
            handler,
        })
    }

    /// Close the browser
    pub async fn close(self) -> SessionResult<()> {
        let mut browser = self.browser.lock().await;
        browser.close().await.map_err(cdp_error)?;
        self.handler.abort();
        Ok(())
    }

    async fn describe(&self, query: &str, element: Element) -> SessionResult<ElementHandle> {
        let returns = element
            .call_js_fn(ELEMENT_INFO_FN, false)
            .await
            .map_err(|e| {
                let message = e.to_string();
                classify(
                    &message,
                    SessionError::StaleElement {
                        element: message.clone(),
                    },
                )
            })?;
        let raw = returns
            .result
            .value
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| SessionError::other("element description missing"))?;
        let info: ElementInfo = serde_json::from_str(&raw).map_err(cdp_error)?;

        let id = format!("cdp-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        self.elements.lock().await.insert(query, id.clone(), element);
        let mut handle = ElementHandle::new(id, info.tag)
            .with_visible(info.visible)
            .with_enabled(info.enabled);
        if !info.text.is_empty() {
            handle = handle.with_text(info.text);
        }
        Ok(handle)
    }
}

#[async_trait]
impl Session for ChromiumSession {
    async fn find_elements(&self, selector: &Selector) -> SessionResult<Vec<ElementHandle>> {
        let query = selector.to_string();
        let not_found = |e: chromiumoxide::error::CdpError| {
            debug!(%selector, error = %e, "lookup failed");
            classify(
                &e.to_string(),
                SessionError::NoSuchElement {
                    selector: query.clone(),
                },
            )
        };
        let found = if let Some(css) = selector.as_css() {
            self.page.find_elements(css).await.map_err(not_found)?
        } else {
            let xpath = selector.as_xpath().unwrap_or_default();
            self.page.find_xpaths(xpath).await.map_err(not_found)?
        };
        {
            let mut registry = self.elements.lock().await;
            registry.retire(&query);
            debug!(%selector, live = registry.len(), "retired earlier handles");
        }
        let mut handles = Vec::with_capacity(found.len());
        for element in found {
            handles.push(self.describe(&query, element).await?);
        }
        Ok(handles)
    }

    async fn interact(&self, element: &ElementHandle, interaction: &Interaction) -> SessionResult<()> {
        let elements = self.elements.lock().await;
        let node = elements.get(&element.id).ok_or_else(|| SessionError::StaleElement {
            element: element.id.clone(),
        })?;
        let not_interactable = |e: chromiumoxide::error::CdpError| SessionError::NotInteractable {
            element: element.id.clone(),
            message: e.to_string(),
        };
        match interaction {
            Interaction::Click => {
                node.click().await.map_err(not_interactable)?;
            }
            Interaction::Fill(value) => {
                node.call_js_fn("function() { this.value = ''; }", false)
                    .await
                    .map_err(not_interactable)?;
                node.click().await.map_err(not_interactable)?;
                node.type_str(value).await.map_err(not_interactable)?;
            }
            Interaction::Select(value) => {
                node.focus().await.map_err(not_interactable)?;
                node.type_str(value).await.map_err(not_interactable)?;
            }
        }
        Ok(())
    }

    async fn execute_script(
        &self,
        script: &str,
        element: Option<&ElementHandle>,
    ) -> SessionResult<serde_json::Value> {
        let script_error = |e: chromiumoxide::error::CdpError| SessionError::Script {
            message: e.to_string(),
        };
        let Some(element) = element else {
            let result = self
                .page
                .evaluate(format!("(() => {{ {script} }})()"))
                .await
                .map_err(script_error)?;
            return Ok(result.value().cloned().unwrap_or(serde_json::Value::Null));
        };
        let elements = self.elements.lock().await;
        let node = elements.get(&element.id).ok_or_else(|| SessionError::StaleElement {
            element: element.id.clone(),
        })?;
        let returns = node
            .call_js_fn(format!("function() {{ const el = this; {script} }}"), true)
            .await
            .map_err(script_error)?;
        if let Some(exception) = returns.exception_details {
            return Err(SessionError::Script {
                message: exception.text,
            });
        }
        Ok(returns.result.value.unwrap_or(serde_json::Value::Null))
    }

    async fn goto(&self, url: &str) -> SessionResult<()> {
        self.elements.lock().await.clear();
        self.page
            .goto(url)
            .await
            .map_err(|e| SessionError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn current_url(&self) -> SessionResult<String> {
        Ok(self.page.url().await.map_err(cdp_error)?.unwrap_or_default())
    }

    async fn title(&self) -> SessionResult<String> {
        Ok(self.page.get_title().await.map_err(cdp_error)?.unwrap_or_default())
    }

    async fn screenshot(&self) -> SessionResult<Vec<u8>> {
        let params = CaptureScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        let shot = self
            .page
            .execute(params)
            .await
            .map_err(|e| SessionError::Screenshot {
                message: e.to_string(),
            })?;
        base64::engine::general_purpose::STANDARD
            .decode(&shot.data)
            .map_err(|e| SessionError::Screenshot {
                message: e.to_string(),
            })
    }

    async fn reload(&self) -> SessionResult<()> {
        self.elements.lock().await.clear();
        self.page.reload().await.map_err(cdp_error)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_settings_builders() {
        let settings = LaunchSettings::default()
            .headed()
            .no_sandbox()
            .with_download_dir("target/test-downloads");
        assert!(!settings.headless);
        assert!(!settings.sandbox);
        assert_eq!(
            settings.download_dir,
            Some(PathBuf::from("target/test-downloads"))
        );
    }

    #[test]
    fn test_settings_follow_suite_config() {
        let mut config = SuiteConfig::default();
        config.browser = "edge".to_string();
        config.download.dir = PathBuf::from("/tmp/receipts");
        let settings = LaunchSettings::from(&config);
        assert_eq!(settings.browser, "edge");
        assert_eq!(settings.download_dir, Some(PathBuf::from("/tmp/receipts")));
        assert!(settings.headless);
    }

    #[test]
    fn test_requery_retires_previous_handles() {
        let mut registry = HandleRegistry::default();
        for poll in 0..40 {
            registry.retire("css=div.shelf-item");
            for i in 0..25 {
                registry.insert("css=div.shelf-item", format!("cdp-{poll}-{i}"), i);
            }
        }
        assert_eq!(registry.len(), 25);
        assert!(registry.get("cdp-0-0").is_none());
        assert_eq!(registry.get("cdp-39-3"), Some(&3));
    }

    #[test]
    fn test_queries_keep_their_own_handles() {
        let mut registry = HandleRegistry::default();
        registry.insert("id=login-btn", "cdp-1".to_string(), 'a');
        registry.retire("css=div.shelf-item");
        registry.insert("css=div.shelf-item", "cdp-2".to_string(), 'b');
        assert_eq!(registry.get("cdp-1"), Some(&'a'));
        registry.clear();
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_lookup_errors_classified() {
        let missing = || SessionError::NoSuchElement {
            selector: "id=x".to_string(),
        };
        assert_eq!(
            classify("Could not find node with given id", missing()),
            missing()
        );
        assert_eq!(
            classify("Received no response from the chromium instance.", missing()),
            SessionError::Closed
        );
        assert_eq!(
            classify("channel closed", missing()),
            SessionError::Closed
        );
        assert!(matches!(
            classify("DOM.querySelectorAll: invalid selector", missing()),
            SessionError::Other { .. }
        ));
        assert!(!classify("websocket error", missing()).is_transient());
    }

    #[tokio::test]
    async fn test_unsupported_browser_rejected() {
        let settings = LaunchSettings {
            browser: "safari".to_string(),
            ..LaunchSettings::default()
        };
        let err = ChromiumSession::launch(&settings).await.unwrap_err();
        assert!(err.to_string().contains("unsupported browser"));
    }
}
