//! Session Handle capability interface.
//!
//! A [`Session`] is one live, navigable UI session. Storeflow never creates or
//! tears sessions down; it only drives the capability set below. Providers
//! (CDP, WebDriver, the in-memory [`MockSession`]) implement the trait.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Session (capability trait)                                  │
//! ├──────────────────────────────────────────────────────────────┤
//! │  find_elements(selector)      -> Vec<ElementHandle>          │
//! │  interact(element, action)    -> native click/fill/select    │
//! │  execute_script(js, element)  -> serde_json::Value           │
//! │  goto(url) / reload()                                        │
//! │  current_url() / title()                                     │
//! │  screenshot()                 -> PNG bytes                   │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use crate::error::{SessionError, SessionResult};
use crate::locator::Selector;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Element handle returned by a session query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementHandle {
    /// Provider-scoped identifier
    pub id: String,
    /// Element tag name
    pub tag_name: String,
    /// Visible text content
    pub text: Option<String>,
    /// Whether the element is rendered and displayed
    pub visible: bool,
    /// Whether the element accepts input
    pub enabled: bool,
}

impl ElementHandle {
    /// Create a visible, enabled element handle
    #[must_use]
    pub fn new(id: impl Into<String>, tag_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tag_name: tag_name.into(),
            text: None,
            visible: true,
            enabled: true,
        }
    }

    /// Set text content
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Set visibility
    #[must_use]
    pub const fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    /// Set enabled state
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Displayed and enabled
    #[must_use]
    pub const fn is_actionable(&self) -> bool {
        self.visible && self.enabled
    }

    /// Case-insensitive text containment
    #[must_use]
    pub fn text_contains(&self, needle: &str) -> bool {
        self.text
            .as_deref()
            .is_some_and(|t| t.to_lowercase().contains(&needle.to_lowercase()))
    }
}

/// A semantic interaction with an element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interaction {
    /// Click the element
    Click,
    /// Replace the element's value with text
    Fill(String),
    /// Choose an option by visible text or value
    Select(String),
}

impl std::fmt::Display for Interaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Click => write!(f, "click"),
            Self::Fill(value) => write!(f, "fill({value:?})"),
            Self::Select(value) => write!(f, "select({value:?})"),
        }
    }
}

/// Capability set a session provider must expose
#[async_trait]
pub trait Session: Send + Sync {
    /// Query all elements matching a selector
    async fn find_elements(&self, selector: &Selector) -> SessionResult<Vec<ElementHandle>>;

    /// Native (direct) interaction
    async fn interact(&self, element: &ElementHandle, interaction: &Interaction)
        -> SessionResult<()>;

    /// Execute script in page context; `el` is bound to `element` when given
    async fn execute_script(
        &self,
        script: &str,
        element: Option<&ElementHandle>,
    ) -> SessionResult<serde_json::Value>;

    /// Navigate to URL
    async fn goto(&self, url: &str) -> SessionResult<()>;

    /// Current URL
    async fn current_url(&self) -> SessionResult<String>;

    /// Current document title
    async fn title(&self) -> SessionResult<String>;

    /// Capture a PNG screenshot
    async fn screenshot(&self) -> SessionResult<Vec<u8>>;

    /// Reload the current page
    async fn reload(&self) -> SessionResult<()> {
        let url = self.current_url().await?;
        self.goto(&url).await
    }
}

// =============================================================================
// MOCK SESSION
// =============================================================================

/// Side effect applied by [`MockSession`] when an element is interacted with
#[derive(Debug, Clone)]
pub enum MockEffect {
    /// Change the current URL
    SetUrl(String),
    /// Change the document title
    SetTitle(String),
    /// Make every element registered under the selector present
    Show(Selector),
    /// Remove every element registered under the selector
    Hide(Selector),
    /// Replace the text of every element registered under the selector
    SetText(Selector, String),
    /// Write a file (simulated download)
    WriteFile(PathBuf, Vec<u8>),
}

/// An element registered with a [`MockSession`]
#[derive(Debug, Clone)]
pub struct MockElement {
    selector: Selector,
    handle: ElementHandle,
    present: bool,
    appears_after: u32,
    native_failure: Option<SessionError>,
    script_failure: Option<SessionError>,
    effects: Vec<MockEffect>,
}

impl MockElement {
    /// Register `handle` as a match for `selector`
    #[must_use]
    pub fn new(selector: Selector, handle: ElementHandle) -> Self {
        Self {
            selector,
            handle,
            present: true,
            appears_after: 0,
            native_failure: None,
            script_failure: None,
            effects: Vec::new(),
        }
    }

    /// Start absent until a [`MockEffect::Show`] fires
    #[must_use]
    pub const fn hidden(mut self) -> Self {
        self.present = false;
        self
    }

    /// Only match once the selector has been queried `queries` times
    #[must_use]
    pub const fn appears_after(mut self, queries: u32) -> Self {
        self.appears_after = queries;
        self
    }

    /// Fail native interaction with `error`
    #[must_use]
    pub fn native_failure(mut self, error: SessionError) -> Self {
        self.native_failure = Some(error);
        self
    }

    /// Fail scripted interaction with `error`
    #[must_use]
    pub fn script_failure(mut self, error: SessionError) -> Self {
        self.script_failure = Some(error);
        self
    }

    /// Apply `effect` after a successful interaction
    #[must_use]
    pub fn on_interact(mut self, effect: MockEffect) -> Self {
        self.effects.push(effect);
        self
    }
}

#[derive(Debug, Default)]
struct MockState {
    url: String,
    title: String,
    closed: bool,
    elements: Vec<MockElement>,
    queries: Vec<(Selector, u32)>,
    navigation_effects: Vec<(String, Vec<MockEffect>)>,
    screenshot: Option<Vec<u8>>,
    script_result: serde_json::Value,
    values: Vec<(String, String)>,
    history: Vec<String>,
}

impl MockState {
    fn bump_queries(&mut self, selector: &Selector) -> u32 {
        if let Some((_, count)) = self.queries.iter_mut().find(|(s, _)| s == selector) {
            *count += 1;
            return *count;
        }
        self.queries.push((selector.clone(), 1));
        1
    }

    fn apply(&mut self, effects: &[MockEffect]) -> SessionResult<()> {
        for effect in effects {
            match effect {
                MockEffect::SetUrl(url) => self.url.clone_from(url),
                MockEffect::SetTitle(title) => self.title.clone_from(title),
                MockEffect::Show(selector) => self.set_present(selector, true),
                MockEffect::Hide(selector) => self.set_present(selector, false),
                MockEffect::SetText(selector, text) => {
                    for element in self.elements.iter_mut().filter(|e| &e.selector == selector) {
                        element.handle.text = Some(text.clone());
                    }
                }
                MockEffect::WriteFile(path, bytes) => {
                    std::fs::write(path, bytes).map_err(|e| SessionError::other(e.to_string()))?;
                }
            }
        }
        Ok(())
    }

    fn set_present(&mut self, selector: &Selector, present: bool) {
        for element in self.elements.iter_mut().filter(|e| &e.selector == selector) {
            element.present = present;
            element.appears_after = 0;
        }
    }

    fn live_element(&self, handle: &ElementHandle) -> SessionResult<MockElement> {
        self.elements
            .iter()
            .find(|e| e.handle.id == handle.id && e.present)
            .cloned()
            .ok_or_else(|| SessionError::StaleElement {
                element: handle.id.clone(),
            })
    }
}

/// In-memory session for unit and integration tests.
///
/// Elements are registered per selector; interactions apply scripted effects
/// so journeys can be driven end to end without a browser.
#[derive(Debug, Default)]
pub struct MockSession {
    state: Mutex<MockState>,
}

impl MockSession {
    /// Create an empty session at `about:blank`
    #[must_use]
    pub fn new() -> Self {
        let session = Self::default();
        session.lock().url = "about:blank".to_string();
        session
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the current URL
    #[must_use]
    pub fn with_url(self, url: impl Into<String>) -> Self {
        self.lock().url = url.into();
        self
    }

    /// Set the document title
    #[must_use]
    pub fn with_title(self, title: impl Into<String>) -> Self {
        self.lock().title = title.into();
        self
    }

    /// Set screenshot bytes
    #[must_use]
    pub fn with_screenshot(self, png: Vec<u8>) -> Self {
        self.lock().screenshot = Some(png);
        self
    }

    /// Register an element
    #[must_use]
    pub fn with_element(self, element: MockElement) -> Self {
        self.add_element(element);
        self
    }

    /// Register an element
    pub fn add_element(&self, element: MockElement) {
        self.lock().elements.push(element);
    }

    /// Apply effects whenever a URL containing `fragment` is navigated to
    pub fn on_navigate(&self, fragment: impl Into<String>, effects: Vec<MockEffect>) {
        self.lock().navigation_effects.push((fragment.into(), effects));
    }

    /// Set the value returned by element-less scripts
    pub fn set_script_result(&self, value: serde_json::Value) {
        self.lock().script_result = value;
    }

    /// Close the session; every later call fails with [`SessionError::Closed`]
    pub fn close(&self) {
        self.lock().closed = true;
    }

    /// Call history for verification
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.lock().history.clone()
    }

    /// Check if a call starting with `prefix` was made
    #[must_use]
    pub fn was_called(&self, prefix: &str) -> bool {
        self.lock().history.iter().any(|c| c.starts_with(prefix))
    }

    /// Last value filled or selected into an element
    #[must_use]
    pub fn value_of(&self, element_id: &str) -> Option<String> {
        self.lock()
            .values
            .iter()
            .rev()
            .find(|(id, _)| id == element_id)
            .map(|(_, v)| v.clone())
    }

    fn ensure_open(state: &MockState) -> SessionResult<()> {
        if state.closed {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }

    fn record_value(state: &mut MockState, element: &ElementHandle, interaction: &Interaction) {
        match interaction {
            Interaction::Fill(v) | Interaction::Select(v) => {
                state.values.push((element.id.clone(), v.clone()));
            }
            Interaction::Click => {}
        }
    }
}

#[async_trait]
impl Session for MockSession {
    async fn find_elements(&self, selector: &Selector) -> SessionResult<Vec<ElementHandle>> {
        let mut state = self.lock();
        Self::ensure_open(&state)?;
        let seen = state.bump_queries(selector);
        Ok(state
            .elements
            .iter()
            .filter(|e| &e.selector == selector && e.present && seen > e.appears_after)
            .map(|e| e.handle.clone())
            .collect())
    }

    async fn interact(
        &self,
        element: &ElementHandle,
        interaction: &Interaction,
    ) -> SessionResult<()> {
        let mut state = self.lock();
        Self::ensure_open(&state)?;
        state.history.push(format!("interact:{}:{interaction}", element.id));
        let live = state.live_element(element)?;
        if let Some(err) = live.native_failure {
            return Err(err);
        }
        Self::record_value(&mut state, element, interaction);
        state.apply(&live.effects)
    }

    async fn execute_script(
        &self,
        script: &str,
        element: Option<&ElementHandle>,
    ) -> SessionResult<serde_json::Value> {
        let mut state = self.lock();
        Self::ensure_open(&state)?;
        let Some(element) = element else {
            state.history.push(format!("script:{script}"));
            return Ok(state.script_result.clone());
        };
        state.history.push(format!("script:{}", element.id));
        let live = state.live_element(element)?;
        if let Some(err) = live.script_failure {
            return Err(err);
        }
        state.apply(&live.effects)?;
        Ok(serde_json::Value::Bool(true))
    }

    async fn goto(&self, url: &str) -> SessionResult<()> {
        let mut state = self.lock();
        Self::ensure_open(&state)?;
        state.history.push(format!("goto:{url}"));
        state.url = url.to_string();
        let effects: Vec<MockEffect> = state
            .navigation_effects
            .iter()
            .filter(|(fragment, _)| url.contains(fragment.as_str()))
            .flat_map(|(_, effects)| effects.iter().cloned())
            .collect();
        state.apply(&effects)
    }

    async fn current_url(&self) -> SessionResult<String> {
        let state = self.lock();
        Self::ensure_open(&state)?;
        Ok(state.url.clone())
    }

    async fn title(&self) -> SessionResult<String> {
        let state = self.lock();
        Self::ensure_open(&state)?;
        Ok(state.title.clone())
    }

    async fn screenshot(&self) -> SessionResult<Vec<u8>> {
        let state = self.lock();
        Self::ensure_open(&state)?;
        state.screenshot.clone().ok_or_else(|| SessionError::Screenshot {
            message: "No mock screenshot set".to_string(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    mod element_handle_tests {
        use super::*;

        #[test]
        fn test_element_handle_defaults() {
            let elem = ElementHandle::new("btn-1", "button");
            assert_eq!(elem.id, "btn-1");
            assert!(elem.is_actionable());
            assert!(elem.text.is_none());
        }

        #[test]
        fn test_actionable_requires_visible_and_enabled() {
            assert!(!ElementHandle::new("a", "a").with_visible(false).is_actionable());
            assert!(!ElementHandle::new("a", "a").with_enabled(false).is_actionable());
        }

        #[test]
        fn test_text_contains_ignores_case() {
            let elem = ElementHandle::new("p", "p").with_text("iPhone 12 Mini");
            assert!(elem.text_contains("iphone 12"));
            assert!(!elem.text_contains("galaxy"));
        }
    }

    mod mock_session_tests {
        use super::*;

        #[tokio::test]
        async fn test_find_elements_by_selector() {
            let session = MockSession::new()
                .with_element(MockElement::new(
                    Selector::css("div.shelf-item"),
                    ElementHandle::new("p1", "div"),
                ))
                .with_element(MockElement::new(
                    Selector::css("div.shelf-item"),
                    ElementHandle::new("p2", "div"),
                ));
            let found = session
                .find_elements(&Selector::css("div.shelf-item"))
                .await
                .unwrap();
            assert_eq!(found.len(), 2);
            assert!(session
                .find_elements(&Selector::css(".missing"))
                .await
                .unwrap()
                .is_empty());
        }

        #[tokio::test]
        async fn test_appears_after_queries() {
            let session = MockSession::new().with_element(
                MockElement::new(Selector::id("late"), ElementHandle::new("late", "div"))
                    .appears_after(2),
            );
            let sel = Selector::id("late");
            assert!(session.find_elements(&sel).await.unwrap().is_empty());
            assert!(session.find_elements(&sel).await.unwrap().is_empty());
            assert_eq!(session.find_elements(&sel).await.unwrap().len(), 1);
        }

        #[tokio::test]
        async fn test_interaction_applies_effects() {
            let session = MockSession::new().with_url("https://shop.test/").with_element(
                MockElement::new(Selector::id("orders"), ElementHandle::new("orders", "a"))
                    .on_interact(MockEffect::SetUrl("https://shop.test/orders".into())),
            );
            let handle = ElementHandle::new("orders", "a");
            session.interact(&handle, &Interaction::Click).await.unwrap();
            assert_eq!(session.current_url().await.unwrap(), "https://shop.test/orders");
            assert!(session.was_called("interact:orders:click"));
        }

        #[tokio::test]
        async fn test_set_text_effect() {
            let session = MockSession::new()
                .with_element(
                    MockElement::new(Selector::id("plus"), ElementHandle::new("plus", "button"))
                        .on_interact(MockEffect::SetText(
                            Selector::css("p.sub-price__val"),
                            "$ 1398.00".into(),
                        )),
                )
                .with_element(MockElement::new(
                    Selector::css("p.sub-price__val"),
                    ElementHandle::new("sub", "p").with_text("$ 699.00"),
                ));
            session
                .interact(&ElementHandle::new("plus", "button"), &Interaction::Click)
                .await
                .unwrap();
            let found = session
                .find_elements(&Selector::css("p.sub-price__val"))
                .await
                .unwrap();
            assert_eq!(found[0].text.as_deref(), Some("$ 1398.00"));
        }

        #[tokio::test]
        async fn test_hidden_element_is_stale() {
            let session = MockSession::new().with_element(
                MockElement::new(Selector::id("gone"), ElementHandle::new("gone", "div")).hidden(),
            );
            let err = session
                .interact(&ElementHandle::new("gone", "div"), &Interaction::Click)
                .await
                .unwrap_err();
            assert!(matches!(err, SessionError::StaleElement { .. }));
        }

        #[tokio::test]
        async fn test_closed_session_rejects_calls() {
            let session = MockSession::new();
            session.close();
            assert_eq!(session.title().await.unwrap_err(), SessionError::Closed);
            assert_eq!(session.screenshot().await.unwrap_err(), SessionError::Closed);
        }

        #[tokio::test]
        async fn test_navigation_effects() {
            let session = MockSession::new().with_element(
                MockElement::new(Selector::css("form.shipping"), ElementHandle::new("f", "form"))
                    .hidden(),
            );
            session.on_navigate("/checkout", vec![MockEffect::Show(Selector::css("form.shipping"))]);
            session.goto("https://shop.test/checkout").await.unwrap();
            assert_eq!(
                session
                    .find_elements(&Selector::css("form.shipping"))
                    .await
                    .unwrap()
                    .len(),
                1
            );
        }

        #[tokio::test]
        async fn test_reload_revisits_current_url() {
            let session = MockSession::new().with_url("https://shop.test/");
            session.reload().await.unwrap();
            assert!(session.was_called("goto:https://shop.test/"));
        }

        #[tokio::test]
        async fn test_fill_records_value() {
            let session = MockSession::new().with_element(MockElement::new(
                Selector::id("firstNameInput"),
                ElementHandle::new("first", "input"),
            ));
            session
                .interact(
                    &ElementHandle::new("first", "input"),
                    &Interaction::Fill("Harini".into()),
                )
                .await
                .unwrap();
            assert_eq!(session.value_of("first").as_deref(), Some("Harini"));
        }
    }
}
