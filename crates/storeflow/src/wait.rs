//! Wait Conditions and the Condition Poller.
//!
//! A [`WaitCondition`] is a tri-state probe over a live session:
//! not yet, satisfied with a value, or permanently failed. The [`Poller`]
//! evaluates it every poll interval until it is satisfied or the deadline
//! passes, and always returns control within `timeout + interval`.
//!
//! Transient lookup errors raised while probing (element detached, not yet
//! rendered) count as "not yet". Empty results never count as success: each
//! built-in condition states exactly what "satisfied" means.

use crate::error::{SessionResult, TimeoutFailure, WaitFailure};
use crate::locator::{resolve, LocatorChain, Resolution, ResolvedElement};
use crate::session::{ElementHandle, Session};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Default timeout for wait operations (10 seconds)
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 10_000;

/// Default polling interval (250ms)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

// =============================================================================
// WAIT OPTIONS
// =============================================================================

/// Timeout and poll interval for one wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitOptions {
    /// Timeout in milliseconds
    pub timeout_ms: u64,
    /// Polling interval in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl WaitOptions {
    /// Create new wait options with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set timeout in milliseconds
    #[must_use]
    pub const fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set polling interval in milliseconds
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    /// Get timeout as Duration
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Get poll interval as Duration
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Timeout must exceed the poll interval
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.timeout_ms > self.poll_interval_ms
    }
}

// =============================================================================
// WAIT CONDITION TRAIT
// =============================================================================

/// Result of one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    /// Not satisfied yet; optionally what was observed
    Pending(Option<String>),
    /// Satisfied with a value
    Ready(T),
    /// Can never be satisfied
    Failed(String),
}

impl<T> Probe<T> {
    /// Pending with an observation
    pub fn pending(observed: impl Into<String>) -> Self {
        Self::Pending(Some(observed.into()))
    }

    /// Check if satisfied
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// A timeout-bounded predicate over session state
#[async_trait]
pub trait WaitCondition: Send + Sync {
    /// Value produced once satisfied
    type Output: Send;

    /// Probe the session once
    async fn check(&self, session: &dyn Session) -> SessionResult<Probe<Self::Output>>;

    /// Description for logs and failures
    fn description(&self) -> String;

    /// Erase the output type so conditions can be combined and stored
    fn boxed(self) -> DynCondition
    where
        Self: Sized + 'static,
    {
        Box::new(Erased(self))
    }
}

/// Type-erased condition with no output
pub type DynCondition = Box<dyn WaitCondition<Output = ()>>;

struct Erased<C>(C);

#[async_trait]
impl<C: WaitCondition> WaitCondition for Erased<C> {
    type Output = ();

    async fn check(&self, session: &dyn Session) -> SessionResult<Probe<()>> {
        Ok(match self.0.check(session).await? {
            Probe::Ready(_) => Probe::Ready(()),
            Probe::Pending(observed) => Probe::Pending(observed),
            Probe::Failed(reason) => Probe::Failed(reason),
        })
    }

    fn description(&self) -> String {
        self.0.description()
    }
}

// =============================================================================
// POLLER
// =============================================================================

/// A satisfied wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Satisfied<T> {
    /// Value produced by the condition
    pub value: T,
    /// Time spent waiting
    pub elapsed: Duration,
    /// Number of probes
    pub polls: u32,
}

/// Condition poller
#[derive(Debug, Clone, Copy, Default)]
pub struct Poller {
    options: WaitOptions,
}

impl Poller {
    /// Create a poller with the given options
    #[must_use]
    pub const fn new(options: WaitOptions) -> Self {
        Self { options }
    }

    /// Options in use
    #[must_use]
    pub const fn options(&self) -> &WaitOptions {
        &self.options
    }

    /// Poll `condition` until satisfied, failed, or timed out
    pub async fn wait<C>(
        &self,
        session: &dyn Session,
        condition: &C,
    ) -> Result<Satisfied<C::Output>, WaitFailure>
    where
        C: WaitCondition + ?Sized,
    {
        let timeout = self.options.timeout();
        let interval = self.options.poll_interval();
        let start = Instant::now();
        let deadline = start + timeout;
        let mut polls = 0u32;
        let mut last_observed: Option<String> = None;

        loop {
            polls += 1;
            match condition.check(session).await {
                Ok(Probe::Ready(value)) => {
                    debug!(condition = %condition.description(), polls, "wait satisfied");
                    return Ok(Satisfied {
                        value,
                        elapsed: start.elapsed(),
                        polls,
                    });
                }
                Ok(Probe::Pending(observed)) => {
                    if observed.is_some() {
                        last_observed = observed;
                    }
                }
                Ok(Probe::Failed(reason)) => {
                    return Err(WaitFailure::Failed {
                        description: condition.description(),
                        reason,
                    });
                }
                Err(err) if err.is_transient() => {
                    debug!(condition = %condition.description(), error = %err, "transient probe error");
                    last_observed = Some(err.to_string());
                }
                Err(err) => {
                    return Err(WaitFailure::Failed {
                        description: condition.description(),
                        reason: err.to_string(),
                    });
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(WaitFailure::Timeout(TimeoutFailure {
                    description: condition.description(),
                    elapsed: now - start,
                    timeout,
                    polls,
                    last_observed,
                }));
            }
            tokio::time::sleep(interval.min(deadline - now)).await;
        }
    }
}

/// Poll a condition with explicit timeout and interval
pub async fn await_condition<C>(
    session: &dyn Session,
    condition: &C,
    options: WaitOptions,
) -> Result<Satisfied<C::Output>, WaitFailure>
where
    C: WaitCondition + ?Sized,
{
    Poller::new(options).wait(session, condition).await
}

/// Fixed settle delay (use only where no condition characterises stability)
pub async fn settle(duration: Duration) {
    debug!(ms = duration.as_millis() as u64, "settling");
    tokio::time::sleep(duration).await;
}

// =============================================================================
// BUILT-IN CONDITIONS
// =============================================================================

/// Satisfied once the chain resolves to at least one element
#[derive(Debug, Clone)]
pub struct ElementPresent {
    chain: LocatorChain,
}

/// Wait for any candidate of `chain` to match
#[must_use]
pub fn element_present(chain: impl Into<LocatorChain>) -> ElementPresent {
    ElementPresent {
        chain: chain.into(),
    }
}

#[async_trait]
impl WaitCondition for ElementPresent {
    type Output = ResolvedElement;

    async fn check(&self, session: &dyn Session) -> SessionResult<Probe<ResolvedElement>> {
        Ok(match resolve(session, &self.chain).await? {
            Resolution::Found(resolved) => Probe::Ready(resolved),
            Resolution::NotFound => Probe::pending("no candidate matched"),
        })
    }

    fn description(&self) -> String {
        format!("element {}", self.chain)
    }
}

/// Satisfied once the resolved match count exceeds a threshold
#[derive(Debug, Clone)]
pub struct ElementCountAbove {
    chain: LocatorChain,
    min: usize,
}

/// Wait for more than `min` matches (`min = 0` is "size > 0")
#[must_use]
pub fn element_count_above(chain: impl Into<LocatorChain>, min: usize) -> ElementCountAbove {
    ElementCountAbove {
        chain: chain.into(),
        min,
    }
}

#[async_trait]
impl WaitCondition for ElementCountAbove {
    type Output = usize;

    async fn check(&self, session: &dyn Session) -> SessionResult<Probe<usize>> {
        let count = match resolve(session, &self.chain).await? {
            Resolution::Found(resolved) => resolved.matches.len(),
            Resolution::NotFound => 0,
        };
        Ok(if count > self.min {
            Probe::Ready(count)
        } else {
            Probe::pending(format!("{count} element(s)"))
        })
    }

    fn description(&self) -> String {
        format!("more than {} of {}", self.min, self.chain)
    }
}

/// Satisfied once no candidate of the chain matches
#[derive(Debug, Clone)]
pub struct ElementAbsent {
    chain: LocatorChain,
}

/// Wait for every candidate of `chain` to stop matching
#[must_use]
pub fn element_absent(chain: impl Into<LocatorChain>) -> ElementAbsent {
    ElementAbsent {
        chain: chain.into(),
    }
}

#[async_trait]
impl WaitCondition for ElementAbsent {
    type Output = ();

    async fn check(&self, session: &dyn Session) -> SessionResult<Probe<()>> {
        Ok(match resolve(session, &self.chain).await? {
            Resolution::NotFound => Probe::Ready(()),
            Resolution::Found(resolved) => {
                Probe::pending(format!("still present via {}", resolved.selector))
            }
        })
    }

    fn description(&self) -> String {
        format!("absence of {}", self.chain)
    }
}

/// Satisfied once a displayed, enabled match exists
#[derive(Debug, Clone)]
pub struct ElementClickable {
    chain: LocatorChain,
}

/// Wait for an actionable match of `chain`
#[must_use]
pub fn element_clickable(chain: impl Into<LocatorChain>) -> ElementClickable {
    ElementClickable {
        chain: chain.into(),
    }
}

#[async_trait]
impl WaitCondition for ElementClickable {
    type Output = ResolvedElement;

    async fn check(&self, session: &dyn Session) -> SessionResult<Probe<ResolvedElement>> {
        let Resolution::Found(mut resolved) = resolve(session, &self.chain).await? else {
            return Ok(Probe::pending("no candidate matched"));
        };
        match resolved.matches.iter().find(|e| e.is_actionable()).cloned() {
            Some(element) => {
                resolved.element = element;
                Ok(Probe::Ready(resolved))
            }
            None => Ok(Probe::pending(format!(
                "{} present but not actionable",
                resolved.selector
            ))),
        }
    }

    fn description(&self) -> String {
        format!("clickable {}", self.chain)
    }
}

/// Satisfied once a match's text contains a needle (case-insensitive)
#[derive(Debug, Clone)]
pub struct ElementTextContains {
    chain: LocatorChain,
    needle: String,
}

/// Wait for a match of `chain` whose text contains `needle`
#[must_use]
pub fn element_text_contains(
    chain: impl Into<LocatorChain>,
    needle: impl Into<String>,
) -> ElementTextContains {
    ElementTextContains {
        chain: chain.into(),
        needle: needle.into(),
    }
}

#[async_trait]
impl WaitCondition for ElementTextContains {
    type Output = ElementHandle;

    async fn check(&self, session: &dyn Session) -> SessionResult<Probe<ElementHandle>> {
        let Resolution::Found(resolved) = resolve(session, &self.chain).await? else {
            return Ok(Probe::pending("no candidate matched"));
        };
        Ok(
            match resolved.matches.into_iter().find(|e| e.text_contains(&self.needle)) {
                Some(element) => Probe::Ready(element),
                None => Probe::pending(format!("no match containing {:?}", self.needle)),
            },
        )
    }

    fn description(&self) -> String {
        format!("{} containing {:?}", self.chain, self.needle)
    }
}

/// Satisfied once the current URL contains a fragment
#[derive(Debug, Clone)]
pub struct UrlContains {
    fragment: String,
}

/// Wait for the URL to contain `fragment`
#[must_use]
pub fn url_contains(fragment: impl Into<String>) -> UrlContains {
    UrlContains {
        fragment: fragment.into(),
    }
}

#[async_trait]
impl WaitCondition for UrlContains {
    type Output = String;

    async fn check(&self, session: &dyn Session) -> SessionResult<Probe<String>> {
        let url = session.current_url().await?;
        Ok(if url.contains(&self.fragment) {
            Probe::Ready(url)
        } else {
            Probe::pending(format!("url {url}"))
        })
    }

    fn description(&self) -> String {
        format!("url containing {:?}", self.fragment)
    }
}

/// Satisfied once the title contains a needle (case-insensitive)
#[derive(Debug, Clone)]
pub struct TitleContains {
    needle: String,
}

/// Wait for the title to contain `needle`
#[must_use]
pub fn title_contains(needle: impl Into<String>) -> TitleContains {
    TitleContains {
        needle: needle.into(),
    }
}

#[async_trait]
impl WaitCondition for TitleContains {
    type Output = String;

    async fn check(&self, session: &dyn Session) -> SessionResult<Probe<String>> {
        let title = session.title().await?;
        Ok(if title.to_lowercase().contains(&self.needle.to_lowercase()) {
            Probe::Ready(title)
        } else {
            Probe::pending(format!("title {title:?}"))
        })
    }

    fn description(&self) -> String {
        format!("title containing {:?}", self.needle)
    }
}

/// Satisfied when any child is satisfied
pub struct AnyOf {
    conditions: Vec<DynCondition>,
}

/// OR of conditions
#[must_use]
pub fn any_of(conditions: Vec<DynCondition>) -> AnyOf {
    AnyOf { conditions }
}

#[async_trait]
impl WaitCondition for AnyOf {
    type Output = ();

    async fn check(&self, session: &dyn Session) -> SessionResult<Probe<()>> {
        let mut observed = Vec::new();
        let mut failed = 0;
        for condition in &self.conditions {
            match condition.check(session).await {
                Ok(Probe::Ready(())) => return Ok(Probe::Ready(())),
                Ok(Probe::Pending(obs)) => observed.extend(obs),
                Ok(Probe::Failed(reason)) => {
                    failed += 1;
                    observed.push(reason);
                }
                Err(err) if err.is_transient() => observed.push(err.to_string()),
                Err(err) => return Err(err),
            }
        }
        if failed == self.conditions.len() {
            return Ok(Probe::Failed(observed.join("; ")));
        }
        Ok(Probe::Pending(Some(observed.join("; "))))
    }

    fn description(&self) -> String {
        let parts: Vec<String> = self.conditions.iter().map(|c| c.description()).collect();
        format!("any of ({})", parts.join(" OR "))
    }
}

impl std::fmt::Debug for AnyOf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyOf")
            .field("description", &self.description())
            .finish()
    }
}

/// Satisfied when every child is satisfied in the same probe
pub struct AllOf {
    conditions: Vec<DynCondition>,
}

/// AND of conditions
#[must_use]
pub fn all_of(conditions: Vec<DynCondition>) -> AllOf {
    AllOf { conditions }
}

#[async_trait]
impl WaitCondition for AllOf {
    type Output = ();

    async fn check(&self, session: &dyn Session) -> SessionResult<Probe<()>> {
        for condition in &self.conditions {
            match condition.check(session).await? {
                Probe::Ready(()) => {}
                Probe::Pending(obs) => return Ok(Probe::Pending(obs)),
                Probe::Failed(reason) => return Ok(Probe::Failed(reason)),
            }
        }
        Ok(Probe::Ready(()))
    }

    fn description(&self) -> String {
        let parts: Vec<String> = self.conditions.iter().map(|c| c.description()).collect();
        format!("all of ({})", parts.join(" AND "))
    }
}

impl std::fmt::Debug for AllOf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllOf")
            .field("description", &self.description())
            .finish()
    }
}

/// Satisfied while the inner condition is not
pub struct Not {
    inner: DynCondition,
}

/// Negate a condition
#[must_use]
pub fn not(inner: DynCondition) -> Not {
    Not { inner }
}

#[async_trait]
impl WaitCondition for Not {
    type Output = ();

    async fn check(&self, session: &dyn Session) -> SessionResult<Probe<()>> {
        Ok(match self.inner.check(session).await? {
            Probe::Ready(()) => Probe::pending(format!("{} holds", self.inner.description())),
            Probe::Pending(_) => Probe::Ready(()),
            Probe::Failed(reason) => Probe::Failed(reason),
        })
    }

    fn description(&self) -> String {
        format!("not {}", self.inner.description())
    }
}

impl std::fmt::Debug for Not {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Not")
            .field("description", &self.description())
            .finish()
    }
}

/// Text of the first match of a chain, remembered for a later comparison.
///
/// [`TextSnapshot::record`] and [`TextSnapshot::changed`] share one slot, so
/// a step can note a value before acting and the next step can wait for the
/// page to show a different one.
#[derive(Debug, Clone)]
pub struct TextSnapshot {
    chain: LocatorChain,
    seen: Arc<Mutex<Option<String>>>,
}

/// Snapshot slot for the text of `chain`
#[must_use]
pub fn text_snapshot(chain: impl Into<LocatorChain>) -> TextSnapshot {
    TextSnapshot {
        chain: chain.into(),
        seen: Arc::new(Mutex::new(None)),
    }
}

impl TextSnapshot {
    /// Condition that stores the current non-empty text
    #[must_use]
    pub fn record(&self) -> RecordText {
        RecordText(self.clone())
    }

    /// Condition satisfied once the text differs from the stored one
    #[must_use]
    pub fn changed(&self) -> TextChanged {
        TextChanged(self.clone())
    }

    /// Last stored text
    #[must_use]
    pub fn recorded(&self) -> Option<String> {
        self.slot().clone()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn current(&self, session: &dyn Session) -> SessionResult<Option<String>> {
        Ok(match resolve(session, &self.chain).await? {
            Resolution::Found(resolved) => resolved
                .element
                .text
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            Resolution::NotFound => None,
        })
    }
}

/// Stores the snapshot text; see [`TextSnapshot::record`]
#[derive(Debug, Clone)]
pub struct RecordText(TextSnapshot);

#[async_trait]
impl WaitCondition for RecordText {
    type Output = String;

    async fn check(&self, session: &dyn Session) -> SessionResult<Probe<String>> {
        let Some(text) = self.0.current(session).await? else {
            return Ok(Probe::pending("no text yet"));
        };
        *self.0.slot() = Some(text.clone());
        Ok(Probe::Ready(text))
    }

    fn description(&self) -> String {
        format!("text of {}", self.0.chain)
    }
}

/// Waits for the snapshot text to change; see [`TextSnapshot::changed`]
#[derive(Debug, Clone)]
pub struct TextChanged(TextSnapshot);

#[async_trait]
impl WaitCondition for TextChanged {
    type Output = String;

    async fn check(&self, session: &dyn Session) -> SessionResult<Probe<String>> {
        let Some(before) = self.0.recorded() else {
            return Ok(Probe::Failed(format!(
                "no text of {} was recorded",
                self.0.chain
            )));
        };
        Ok(match self.0.current(session).await? {
            Some(now) if now != before => Probe::Ready(now),
            Some(now) => Probe::pending(format!("still {now:?}")),
            None => Probe::pending("no text"),
        })
    }

    fn description(&self) -> String {
        format!("change of {}", self.0.chain)
    }
}

/// A closure-based wait condition
pub struct FnCondition<F, T> {
    func: F,
    description: String,
    _output: PhantomData<fn() -> T>,
}

impl<F, T> FnCondition<F, T>
where
    F: for<'a> Fn(&'a dyn Session) -> BoxFuture<'a, SessionResult<Probe<T>>> + Send + Sync,
    T: Send,
{
    /// Create a new function condition
    pub fn new(description: impl Into<String>, func: F) -> Self {
        Self {
            func,
            description: description.into(),
            _output: PhantomData,
        }
    }
}

impl<F, T> std::fmt::Debug for FnCondition<F, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCondition")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, T> WaitCondition for FnCondition<F, T>
where
    F: for<'a> Fn(&'a dyn Session) -> BoxFuture<'a, SessionResult<Probe<T>>> + Send + Sync,
    T: Send,
{
    type Output = T;

    async fn check(&self, session: &dyn Session) -> SessionResult<Probe<T>> {
        (self.func)(session).await
    }

    fn description(&self) -> String {
        self.description.clone()
    }
}

// =============================================================================
// TESTS
// =============================================================================
