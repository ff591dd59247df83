//! Locator chains and first-match-wins resolution.
//!
//! A [`LocatorChain`] lists alternative selectors for the same logical UI
//! target, most specific first. [`resolve`] walks the chain in order and stops
//! at the first selector that yields at least one element. Ordering is part of
//! the contract: a later selector is never preferred even if it would also
//! match.
//!
//! Resolution is a single pass with no retries; waiting for a target to appear
//! is the poller's job (see [`crate::wait::element_present`]).

use crate::error::SessionResult;
use crate::session::{ElementHandle, Session};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Selector strategy for locating elements
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Selector {
    /// CSS selector (e.g., "div.shelf-item")
    Css(String),
    /// XPath expression
    XPath(String),
    /// Element id attribute
    Id(String),
    /// Any element whose normalized text contains the string
    Text(String),
}

impl Selector {
    /// Create a CSS selector
    #[must_use]
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    /// Create an XPath selector
    #[must_use]
    pub fn xpath(expr: impl Into<String>) -> Self {
        Self::XPath(expr.into())
    }

    /// Create an id selector
    #[must_use]
    pub fn id(id: impl Into<String>) -> Self {
        Self::Id(id.into())
    }

    /// Create a text-content selector
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Strategy name
    #[must_use]
    pub const fn strategy(&self) -> &'static str {
        match self {
            Self::Css(_) => "css",
            Self::XPath(_) => "xpath",
            Self::Id(_) => "id",
            Self::Text(_) => "text",
        }
    }

    /// CSS form, when the strategy has one
    #[must_use]
    pub fn as_css(&self) -> Option<String> {
        match self {
            Self::Css(s) => Some(s.clone()),
            Self::Id(id) => Some(format!("#{id}")),
            Self::XPath(_) | Self::Text(_) => None,
        }
    }

    /// XPath form; every strategy other than CSS has one
    #[must_use]
    pub fn as_xpath(&self) -> Option<String> {
        match self {
            Self::XPath(x) => Some(x.clone()),
            Self::Id(id) => Some(format!("//*[@id={}]", xpath_literal(id))),
            Self::Text(t) => Some(format!(
                "//*[contains(normalize-space(.), {})]",
                xpath_literal(t)
            )),
            Self::Css(_) => None,
        }
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Css(s) | Self::XPath(s) | Self::Id(s) | Self::Text(s) => {
                write!(f, "{}={s}", self.strategy())
            }
        }
    }
}

/// Quote a string for use inside an XPath expression
pub(crate) fn xpath_literal(s: &str) -> String {
    if !s.contains('\'') {
        format!("'{s}'")
    } else if !s.contains('"') {
        format!("\"{s}\"")
    } else {
        let parts: Vec<String> = s.split('\'').map(|p| format!("'{p}'")).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

/// Ordered, non-empty list of selectors for one logical target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorChain {
    candidates: Vec<Selector>,
    visible_only: bool,
}

impl LocatorChain {
    /// Chain with a single candidate
    #[must_use]
    pub fn of(first: Selector) -> Self {
        Self {
            candidates: vec![first],
            visible_only: false,
        }
    }

    /// Chain from a list; `None` when the list is empty
    #[must_use]
    pub fn from_selectors(selectors: impl IntoIterator<Item = Selector>) -> Option<Self> {
        let candidates: Vec<Selector> = selectors.into_iter().collect();
        if candidates.is_empty() {
            return None;
        }
        Some(Self {
            candidates,
            visible_only: false,
        })
    }

    /// Append a lower-preference fallback
    #[must_use]
    pub fn or(mut self, fallback: Selector) -> Self {
        self.candidates.push(fallback);
        self
    }

    /// Only count displayed elements as matches
    #[must_use]
    pub const fn visible_only(mut self) -> Self {
        self.visible_only = true;
        self
    }

    /// Candidates in preference order
    #[must_use]
    pub fn candidates(&self) -> &[Selector] {
        &self.candidates
    }

    /// Whether hidden elements are ignored
    #[must_use]
    pub const fn requires_visible(&self) -> bool {
        self.visible_only
    }
}

impl From<Selector> for LocatorChain {
    fn from(selector: Selector) -> Self {
        Self::of(selector)
    }
}

impl std::fmt::Display for LocatorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined: Vec<String> = self.candidates.iter().map(ToString::to_string).collect();
        write!(f, "[{}]", joined.join(" | "))
    }
}

/// The element a chain resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedElement {
    /// First match of the winning selector
    pub element: ElementHandle,
    /// Every match of the winning selector
    pub matches: Vec<ElementHandle>,
    /// Winning selector
    pub selector: Selector,
    /// Index of the winning selector in the chain
    pub candidate: usize,
}

/// Outcome of resolving a chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A candidate matched
    Found(ResolvedElement),
    /// No candidate matched
    NotFound,
}

impl Resolution {
    /// Resolved element, if any
    #[must_use]
    pub fn found(self) -> Option<ResolvedElement> {
        match self {
            Self::Found(resolved) => Some(resolved),
            Self::NotFound => None,
        }
    }

    /// Check if nothing matched
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Resolve a chain against a session, first match wins.
///
/// Transient lookup errors on one candidate count as "no match" for that
/// candidate; other session errors are returned.
pub async fn resolve<S: Session + ?Sized>(
    session: &S,
    chain: &LocatorChain,
) -> SessionResult<Resolution> {
    for (index, selector) in chain.candidates().iter().enumerate() {
        let found = match session.find_elements(selector).await {
            Ok(found) => found,
            Err(err) if err.is_transient() => {
                debug!(%selector, error = %err, "candidate lookup failed transiently");
                continue;
            }
            Err(err) => return Err(err),
        };

        let matches: Vec<ElementHandle> = if chain.requires_visible() {
            found.into_iter().filter(|e| e.visible).collect()
        } else {
            found
        };

        if let Some(first) = matches.first().cloned() {
            debug!(%selector, candidate = index, count = matches.len(), "locator resolved");
            return Ok(Resolution::Found(ResolvedElement {
                element: first,
                matches,
                selector: selector.clone(),
                candidate: index,
            }));
        }
    }

    debug!(%chain, "locator chain matched nothing");
    Ok(Resolution::NotFound)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::SessionError;
    use crate::session::{MockElement, MockSession};
    use async_trait::async_trait;

    mod selector_tests {
        use super::*;

        #[test]
        fn test_strategy_names() {
            assert_eq!(Selector::css("a").strategy(), "css");
            assert_eq!(Selector::xpath("//a").strategy(), "xpath");
            assert_eq!(Selector::id("orders").strategy(), "id");
            assert_eq!(Selector::text("Logout").strategy(), "text");
        }

        #[test]
        fn test_id_has_css_and_xpath_forms() {
            let sel = Selector::id("downloadpdf");
            assert_eq!(sel.as_css().as_deref(), Some("#downloadpdf"));
            assert_eq!(sel.as_xpath().as_deref(), Some("//*[@id='downloadpdf']"));
        }

        #[test]
        fn test_text_xpath_quotes_apostrophes() {
            let sel = Selector::text("Don't panic");
            let xpath = sel.as_xpath().unwrap();
            assert!(xpath.contains("\"Don't panic\""));
        }

        #[test]
        fn test_xpath_literal_with_both_quotes() {
            let lit = xpath_literal(r#"a'b"c"#);
            assert!(lit.starts_with("concat("));
        }

        #[test]
        fn test_display() {
            assert_eq!(Selector::css(".bag").to_string(), "css=.bag");
        }
    }

    mod chain_tests {
        use super::*;

        #[test]
        fn test_from_selectors_rejects_empty() {
            assert!(LocatorChain::from_selectors(Vec::new()).is_none());
        }

        #[test]
        fn test_chain_preserves_order() {
            let chain = LocatorChain::of(Selector::css(".a"))
                .or(Selector::css(".b"))
                .or(Selector::css(".c"));
            let names: Vec<String> = chain.candidates().iter().map(ToString::to_string).collect();
            assert_eq!(names, vec!["css=.a", "css=.b", "css=.c"]);
        }

        #[test]
        fn test_chain_display() {
            let chain = LocatorChain::of(Selector::css(".a")).or(Selector::id("b"));
            assert_eq!(chain.to_string(), "[css=.a | id=b]");
        }
    }

    mod resolve_tests {
        use super::*;

        fn shelf_session() -> MockSession {
            let session = MockSession::new();
            for i in 0..3 {
                session.add_element(MockElement::new(
                    Selector::css("div.shelf-item"),
                    ElementHandle::new(format!("shelf-{i}"), "div"),
                ));
            }
            session
        }

        #[tokio::test]
        async fn test_bad_selector_falls_through_to_shelf_items() {
            let session = shelf_session();
            let chain =
                LocatorChain::of(Selector::css(".bad-selector")).or(Selector::css("div.shelf-item"));
            let resolved = resolve(&session, &chain).await.unwrap().found().unwrap();
            assert_eq!(resolved.selector, Selector::css("div.shelf-item"));
            assert_eq!(resolved.candidate, 1);
            assert_eq!(resolved.matches.len(), 3);
            assert_eq!(resolved.element.id, "shelf-0");
        }

        #[tokio::test]
        async fn test_earlier_candidate_wins_over_later_match() {
            let session = shelf_session().with_element(MockElement::new(
                Selector::css(".featured"),
                ElementHandle::new("featured", "div"),
            ));
            let chain = LocatorChain::of(Selector::css(".featured")).or(Selector::css("div.shelf-item"));
            let resolved = resolve(&session, &chain).await.unwrap().found().unwrap();
            assert_eq!(resolved.candidate, 0);
            assert_eq!(resolved.element.id, "featured");
        }

        #[tokio::test]
        async fn test_not_found_is_not_an_error() {
            let session = MockSession::new();
            let chain = LocatorChain::of(Selector::css(".nope"));
            assert!(resolve(&session, &chain).await.unwrap().is_not_found());
        }

        #[tokio::test]
        async fn test_visible_only_skips_hidden_matches() {
            let session = MockSession::new()
                .with_element(MockElement::new(
                    Selector::text("Logout"),
                    ElementHandle::new("hidden-logout", "span").with_visible(false),
                ))
                .with_element(MockElement::new(
                    Selector::css("a.logout"),
                    ElementHandle::new("logout-link", "a"),
                ));
            let chain = LocatorChain::of(Selector::text("Logout"))
                .or(Selector::css("a.logout"))
                .visible_only();
            let resolved = resolve(&session, &chain).await.unwrap().found().unwrap();
            assert_eq!(resolved.element.id, "logout-link");
        }

        struct FlakySession;

        #[async_trait]
        impl Session for FlakySession {
            async fn find_elements(&self, selector: &Selector) -> SessionResult<Vec<ElementHandle>> {
                match selector {
                    Selector::Css(s) if s == ".flaky" => Err(SessionError::StaleElement {
                        element: "x".into(),
                    }),
                    Selector::Css(s) if s == ".closed" => Err(SessionError::Closed),
                    _ => Ok(vec![ElementHandle::new("ok", "div")]),
                }
            }
            async fn interact(
                &self,
                _element: &ElementHandle,
                _interaction: &crate::session::Interaction,
            ) -> SessionResult<()> {
                Ok(())
            }
            async fn execute_script(
                &self,
                _script: &str,
                _element: Option<&ElementHandle>,
            ) -> SessionResult<serde_json::Value> {
                Ok(serde_json::Value::Null)
            }
            async fn goto(&self, _url: &str) -> SessionResult<()> {
                Ok(())
            }
            async fn current_url(&self) -> SessionResult<String> {
                Ok(String::new())
            }
            async fn title(&self) -> SessionResult<String> {
                Ok(String::new())
            }
            async fn screenshot(&self) -> SessionResult<Vec<u8>> {
                Ok(Vec::new())
            }
        }

        #[tokio::test]
        async fn test_transient_error_skips_candidate() {
            let chain = LocatorChain::of(Selector::css(".flaky")).or(Selector::css(".fine"));
            let resolved = resolve(&FlakySession, &chain).await.unwrap().found().unwrap();
            assert_eq!(resolved.candidate, 1);
        }

        #[tokio::test]
        async fn test_fatal_error_propagates() {
            let chain = LocatorChain::of(Selector::css(".closed")).or(Selector::css(".fine"));
            assert_eq!(
                resolve(&FlakySession, &chain).await.unwrap_err(),
                SessionError::Closed
            );
        }
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_first_satisfiable_candidate_wins(
                satisfiable in proptest::collection::vec(any::<bool>(), 1..8)
            ) {
                let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
                let session = MockSession::new();
                let selectors: Vec<Selector> = (0..satisfiable.len())
                    .map(|i| Selector::css(format!(".candidate-{i}")))
                    .collect();
                for (i, ok) in satisfiable.iter().enumerate() {
                    if *ok {
                        session.add_element(MockElement::new(
                            selectors[i].clone(),
                            ElementHandle::new(format!("el-{i}"), "div"),
                        ));
                    }
                }
                let chain = LocatorChain::from_selectors(selectors).unwrap();
                let resolution = runtime.block_on(resolve(&session, &chain)).unwrap();
                match satisfiable.iter().position(|ok| *ok) {
                    Some(expected) => {
                        let resolved = resolution.found().unwrap();
                        prop_assert_eq!(resolved.candidate, expected);
                    }
                    None => prop_assert!(resolution.is_not_found()),
                }
            }
        }
    }
}
