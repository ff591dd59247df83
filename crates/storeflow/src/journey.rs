//! Flow Orchestrator.
//!
//! A [`Journey`] is an ordered list of [`Step`]s. Each step locates its target
//! through a [`LocatorChain`], performs its action through the
//! [`Dispatcher`], and then waits for its post-condition. The first failed
//! step ends the journey: diagnostics and a screenshot are recorded in the
//! [`TestContext`] and no later step runs.

use crate::dispatch::{DispatchMode, Dispatcher};
use crate::download::clear_download_dir;
use crate::error::{StepError, StorefrontError, StorefrontResult, WaitFailure};
use crate::locator::{resolve, LocatorChain, Resolution};
use crate::report::{ReportPipeline, StepOutcome, StepStatus, TestContext};
use crate::session::{Interaction, Session};
use crate::wait::{element_clickable, element_present, DynCondition, Poller, WaitOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

// =============================================================================
// STEPS
// =============================================================================

/// What a step does once its target is resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    /// Pure wait step
    None,
    /// Interact with the resolved target
    Interact(Interaction),
    /// Navigate to a URL
    Navigate(String),
}

/// One locate, act, await-postcondition unit
pub struct Step {
    name: String,
    target: Option<LocatorChain>,
    action: StepAction,
    post_condition: Option<DynCondition>,
    settle: Option<Duration>,
    wait: Option<WaitOptions>,
    optional: bool,
    unless_present: Option<LocatorChain>,
    fallback_url: Option<String>,
    clear_dir: Option<PathBuf>,
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("action", &self.action)
            .field(
                "post_condition",
                &self.post_condition.as_ref().map(|c| c.description()),
            )
            .field("optional", &self.optional)
            .finish_non_exhaustive()
    }
}

impl Step {
    /// A step with no target, action or post-condition
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: None,
            action: StepAction::None,
            post_condition: None,
            settle: None,
            wait: None,
            optional: false,
            unless_present: None,
            fallback_url: None,
            clear_dir: None,
        }
    }

    /// Set the target
    #[must_use]
    pub fn on(mut self, target: impl Into<LocatorChain>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Click the target
    #[must_use]
    pub fn click(mut self) -> Self {
        self.action = StepAction::Interact(Interaction::Click);
        self
    }

    /// Type `value` into the target
    #[must_use]
    pub fn fill(mut self, value: impl Into<String>) -> Self {
        self.action = StepAction::Interact(Interaction::Fill(value.into()));
        self
    }

    /// Pick `value` in the target select
    #[must_use]
    pub fn select(mut self, value: impl Into<String>) -> Self {
        self.action = StepAction::Interact(Interaction::Select(value.into()));
        self
    }

    /// Navigate to `url`
    #[must_use]
    pub fn goto(mut self, url: impl Into<String>) -> Self {
        self.action = StepAction::Navigate(url.into());
        self
    }

    /// Condition that defines success
    #[must_use]
    pub fn expect(mut self, condition: DynCondition) -> Self {
        self.post_condition = Some(condition);
        self
    }

    /// Fixed delay after the action, for animations no condition captures
    #[must_use]
    pub const fn settle(mut self, delay: Duration) -> Self {
        self.settle = Some(delay);
        self
    }

    /// Override the journey's wait options for this step
    #[must_use]
    pub const fn with_wait(mut self, options: WaitOptions) -> Self {
        self.wait = Some(options);
        self
    }

    /// Absent target skips the step instead of failing it
    #[must_use]
    pub const fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Skip the step when `guard` already resolves
    #[must_use]
    pub fn unless_present(mut self, guard: impl Into<LocatorChain>) -> Self {
        self.unless_present = Some(guard.into());
        self
    }

    /// Navigate to `url` when the target never appears
    #[must_use]
    pub fn or_navigate(mut self, url: impl Into<String>) -> Self {
        self.fallback_url = Some(url.into());
        self
    }

    /// Empty `dir` before acting (downloads)
    #[must_use]
    pub fn clearing(mut self, dir: impl Into<PathBuf>) -> Self {
        self.clear_dir = Some(dir.into());
        self
    }

    /// Step name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Step action
    #[must_use]
    pub const fn action(&self) -> &StepAction {
        &self.action
    }

    /// Whether the step is optional
    #[must_use]
    pub const fn is_optional(&self) -> bool {
        self.optional
    }
}

enum Executed {
    Done {
        mode: Option<DispatchMode>,
        detail: String,
    },
    Skipped(String),
}

// =============================================================================
// JOURNEY
// =============================================================================

/// Journey lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JourneyState {
    /// Not started
    Pending,
    /// Executing steps
    Running,
    /// Every step succeeded or was skipped
    Completed,
    /// Stopped at the named step
    Failed {
        /// Step that failed
        step: String,
    },
}

impl JourneyState {
    /// Completed or Failed
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }
}

/// Result of one journey execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JourneyReport {
    /// Journey name
    pub journey: String,
    /// Final state
    pub state: JourneyState,
    /// Outcome per executed step
    pub outcomes: Vec<StepOutcome>,
}

impl JourneyReport {
    /// Check if every step passed or was skipped
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.state == JourneyState::Completed
    }

    /// Name of the failed step, if any
    #[must_use]
    pub fn failed_step(&self) -> Option<&str> {
        match &self.state {
            JourneyState::Failed { step } => Some(step),
            _ => None,
        }
    }

    /// The failing outcome, if any
    #[must_use]
    pub fn failure(&self) -> Option<&StepOutcome> {
        self.outcomes.iter().find(|o| o.is_failure())
    }
}

/// An ordered sequence of steps forming one user scenario
#[derive(Debug)]
pub struct Journey {
    name: String,
    steps: Vec<Step>,
    wait: WaitOptions,
    dispatcher: Dispatcher,
}

impl Journey {
    /// Empty journey with default waits and dispatch policy
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            wait: WaitOptions::default(),
            dispatcher: Dispatcher::default(),
        }
    }

    /// Append a step
    #[must_use]
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Append several steps
    #[must_use]
    pub fn with_steps(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.steps.extend(steps);
        self
    }

    /// Default wait options for steps without their own
    #[must_use]
    pub const fn with_wait(mut self, options: WaitOptions) -> Self {
        self.wait = options;
        self
    }

    /// Dispatcher used for interactions
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Journey name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Steps in order
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Run every step in order, stopping at the first failure.
    ///
    /// Outcomes are recorded into `ctx` as they happen.
    pub async fn run(&self, session: &dyn Session, ctx: &mut TestContext) -> JourneyReport {
        let mut state = JourneyState::Pending;
        let mut outcomes = Vec::with_capacity(self.steps.len());
        debug!(journey = %self.name, ?state, "journey created");
        state = JourneyState::Running;
        info!(journey = %self.name, steps = self.steps.len(), "journey started");
        ctx.info(format!("journey {} started", self.name));

        for step in &self.steps {
            let started = Instant::now();
            let result = self.execute(step, session).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let outcome = match result {
                Ok(Executed::Done { mode, detail }) => {
                    info!(journey = %self.name, step = %step.name, "step passed");
                    StepOutcome::success(&step.name, detail).with_dispatch(mode)
                }
                Ok(Executed::Skipped(reason)) => {
                    info!(journey = %self.name, step = %step.name, %reason, "step skipped");
                    StepOutcome::skipped(&step.name, reason)
                }
                Err(err) => {
                    let outcome = self.fail_step(step, &err, session, ctx).await;
                    state = JourneyState::Failed {
                        step: step.name.clone(),
                    };
                    outcome
                }
            }
            .with_duration_ms(duration_ms);

            let failed = outcome.status == StepStatus::Failure;
            ctx.record(outcome.clone());
            outcomes.push(outcome);
            if failed {
                break;
            }
        }

        if !state.is_terminal() {
            state = JourneyState::Completed;
            ctx.pass(format!("journey {} completed", self.name));
            info!(journey = %self.name, "journey completed");
        }
        JourneyReport {
            journey: self.name.clone(),
            state,
            outcomes,
        }
    }

    async fn fail_step(
        &self,
        step: &Step,
        err: &StepError,
        session: &dyn Session,
        ctx: &mut TestContext,
    ) -> StepOutcome {
        let url = session
            .current_url()
            .await
            .unwrap_or_else(|e| format!("<unavailable: {e}>"));
        let title = session
            .title()
            .await
            .unwrap_or_else(|e| format!("<unavailable: {e}>"));
        let message = format!("{err} (url: {url}, title: {title:?})");
        error!(journey = %self.name, step = %step.name, %message, "step failed");
        let evidence = ctx
            .capture_evidence(session, &format!("{}_{}", self.name, step.name))
            .await;
        ctx.fail(format!("step {} failed: {message}", step.name));
        StepOutcome::failure(&step.name, message).with_evidence(evidence)
    }

    async fn execute(&self, step: &Step, session: &dyn Session) -> Result<Executed, StepError> {
        let poller = Poller::new(step.wait.unwrap_or(self.wait));

        if let Some(guard) = &step.unless_present {
            if let Resolution::Found(found) = resolve(session, guard).await? {
                return Ok(Executed::Skipped(format!(
                    "{guard} already present via {}",
                    found.selector
                )));
            }
        }

        if let Some(dir) = &step.clear_dir {
            clear_download_dir(dir).map_err(|e| StepError::Io {
                message: format!("clearing {}: {e}", dir.display()),
            })?;
        }

        let wants_interaction = matches!(step.action, StepAction::Interact(_));
        let mut element = None;
        let mut detail = String::from("ok");

        if let Some(chain) = &step.target {
            let located = if wants_interaction {
                poller.wait(session, &element_clickable(chain.clone())).await
            } else {
                poller.wait(session, &element_present(chain.clone())).await
            };
            match located {
                Ok(found) => {
                    debug!(step = %step.name, selector = %found.value.selector, "target resolved");
                    element = Some(found.value.element);
                }
                Err(WaitFailure::Timeout(mut timeout)) => {
                    let absent = resolve(session, chain).await?.is_not_found();
                    if !absent {
                        return Err(WaitFailure::Timeout(timeout).into());
                    }
                    if let Some(url) = &step.fallback_url {
                        warn!(step = %step.name, %url, "target absent, navigating instead");
                        session.goto(url).await?;
                        detail = format!("target absent, navigated to {url}");
                    } else if step.optional {
                        return Ok(Executed::Skipped(format!("optional target {chain} absent")));
                    } else {
                        timeout.last_observed = Some(format!("target {chain} absent"));
                        return Err(WaitFailure::Timeout(timeout).into());
                    }
                }
                Err(failed) => return Err(failed.into()),
            }
        }

        let mut mode = None;
        match &step.action {
            StepAction::None => {}
            StepAction::Navigate(url) => {
                session.goto(url).await?;
            }
            StepAction::Interact(interaction) => match &element {
                Some(element) => {
                    let outcome = self
                        .dispatcher
                        .perform(session, element, interaction)
                        .await?;
                    if outcome.used_fallback() {
                        warn!(step = %step.name, "action needed scripted fallback");
                    }
                    detail = format!("{interaction} via {}", outcome.mode);
                    mode = Some(outcome.mode);
                }
                None if step.fallback_url.is_some() => {}
                None => {
                    return Err(StepError::Invalid {
                        message: format!("{interaction} without a target"),
                    });
                }
            },
        }

        if let Some(delay) = step.settle {
            crate::wait::settle(delay).await;
        }

        if let Some(condition) = &step.post_condition {
            let done = poller.wait(session, condition.as_ref()).await?;
            debug!(step = %step.name, polls = done.polls, "post-condition satisfied");
            detail = format!("{detail}; {}", condition.description());
        }

        Ok(Executed::Done { mode, detail })
    }
}

// =============================================================================
// PARALLEL SUITE
// =============================================================================

/// Run each journey on its own session concurrently.
///
/// Every journey gets its own [`TestContext`] from `pipeline`; sessions are
/// never shared. Reports come back in input order.
pub async fn run_parallel<S>(
    pipeline: Arc<ReportPipeline>,
    runs: Vec<(Journey, S)>,
) -> Vec<StorefrontResult<JourneyReport>>
where
    S: Session + 'static,
{
    let mut set = JoinSet::new();
    let total = runs.len();
    for (index, (journey, session)) in runs.into_iter().enumerate() {
        let pipeline = Arc::clone(&pipeline);
        set.spawn(async move {
            let result = async {
                let mut ctx = pipeline.begin_test(journey.name())?;
                let report = journey.run(&session, &mut ctx).await;
                ctx.finish();
                Ok::<_, StorefrontError>(report)
            }
            .await;
            (index, result)
        });
    }

    let mut results: Vec<Option<StorefrontResult<JourneyReport>>> =
        (0..total).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, result)) => results[index] = Some(result),
            Err(err) => warn!(error = %err, "journey task did not complete"),
        }
    }
    results
        .into_iter()
        .map(|slot| {
            slot.unwrap_or_else(|| {
                Err(StorefrontError::Task {
                    message: "journey task panicked or was cancelled".to_string(),
                })
            })
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::locator::Selector;
    use crate::session::{ElementHandle, MockEffect, MockElement, MockSession};
    use crate::wait::{url_contains, WaitCondition};
    use tempfile::TempDir;

    fn fast() -> WaitOptions {
        WaitOptions::new().with_timeout(500).with_poll_interval(50)
    }

    fn pipeline(tmp: &TempDir) -> Arc<ReportPipeline> {
        ReportPipeline::shared(tmp.path())
    }

    mod step_tests {
        use super::*;

        #[test]
        fn test_builder() {
            let step = Step::new("open cart")
                .on(Selector::css(".bag"))
                .click()
                .optional()
                .unless_present(Selector::css(".float-cart--open"));
            assert_eq!(step.name(), "open cart");
            assert!(step.is_optional());
            assert_eq!(step.action(), &StepAction::Interact(Interaction::Click));
        }

        #[test]
        fn test_debug_shows_condition() {
            let step = Step::new("wait").expect(url_contains("/orders").boxed());
            assert!(format!("{step:?}").contains("url containing"));
        }

        #[test]
        fn test_state_terminal() {
            assert!(!JourneyState::Pending.is_terminal());
            assert!(!JourneyState::Running.is_terminal());
            assert!(JourneyState::Completed.is_terminal());
            assert!(JourneyState::Failed { step: "x".into() }.is_terminal());
        }
    }

    mod run_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_successful_journey() {
            let tmp = TempDir::new().unwrap();
            let session = MockSession::new().with_url("https://shop.test/").with_element(
                MockElement::new(Selector::id("orders"), ElementHandle::new("o", "a"))
                    .on_interact(MockEffect::SetUrl("https://shop.test/orders".into())),
            );
            let journey = Journey::new("orders")
                .with_wait(fast())
                .step(
                    Step::new("open orders")
                        .on(Selector::id("orders"))
                        .click()
                        .expect(url_contains("/orders").boxed()),
                );
            let mut ctx = pipeline(&tmp).begin_test("orders").unwrap();
            let report = journey.run(&session, &mut ctx).await;
            assert!(report.is_success());
            assert_eq!(report.outcomes[0].dispatch, Some(DispatchMode::Direct));
            assert_eq!(ctx.steps().len(), 1);
        }

        #[tokio::test(start_paused = true)]
        async fn test_optional_absent_is_skipped() {
            let tmp = TempDir::new().unwrap();
            let session = MockSession::new();
            let journey = Journey::new("cart").with_wait(fast()).step(
                Step::new("close cart")
                    .on(Selector::css(".float-cart__close-btn"))
                    .click()
                    .optional(),
            );
            let mut ctx = pipeline(&tmp).begin_test("cart").unwrap();
            let report = journey.run(&session, &mut ctx).await;
            assert!(report.is_success());
            assert_eq!(report.outcomes[0].status, StepStatus::Skipped);
        }

        #[tokio::test(start_paused = true)]
        async fn test_optional_present_but_broken_fails() {
            let tmp = TempDir::new().unwrap();
            let session = MockSession::new().with_element(MockElement::new(
                Selector::css(".float-cart__close-btn"),
                ElementHandle::new("close", "div").with_enabled(false),
            ));
            let journey = Journey::new("cart").with_wait(fast()).step(
                Step::new("close cart")
                    .on(Selector::css(".float-cart__close-btn"))
                    .click()
                    .optional(),
            );
            let mut ctx = pipeline(&tmp).begin_test("cart").unwrap();
            let report = journey.run(&session, &mut ctx).await;
            assert_eq!(report.failed_step(), Some("close cart"));
            assert!(report.failure().unwrap().message.contains("timed out"));
        }

        #[tokio::test(start_paused = true)]
        async fn test_required_absent_target_times_out() {
            let tmp = TempDir::new().unwrap();
            let session = MockSession::new().with_url("https://shop.test/");
            let journey = Journey::new("login").with_wait(fast()).step(
                Step::new("open sign in")
                    .on(Selector::id("signin"))
                    .click(),
            );
            let mut ctx = pipeline(&tmp).begin_test("login").unwrap();
            let report = journey.run(&session, &mut ctx).await;
            let failure = report.failure().unwrap();
            assert!(failure.message.contains("timed out after"));
            assert!(failure.message.contains("polls"));
            assert!(failure.message.contains("last observed: target [id=signin] absent"));
            assert!(failure.message.contains("url: https://shop.test/"));
        }

        #[tokio::test(start_paused = true)]
        async fn test_guard_skips_step() {
            let tmp = TempDir::new().unwrap();
            let session = MockSession::new().with_element(MockElement::new(
                Selector::css(".float-cart--open"),
                ElementHandle::new("cart", "div"),
            ));
            let journey = Journey::new("cart").with_wait(fast()).step(
                Step::new("open cart")
                    .on(Selector::css(".bag"))
                    .click()
                    .unless_present(Selector::css(".float-cart--open")),
            );
            let mut ctx = pipeline(&tmp).begin_test("cart").unwrap();
            let report = journey.run(&session, &mut ctx).await;
            assert_eq!(report.outcomes[0].status, StepStatus::Skipped);
            assert!(!session.was_called("interact:"));
        }

        #[tokio::test(start_paused = true)]
        async fn test_absent_target_navigates_to_fallback() {
            let tmp = TempDir::new().unwrap();
            let session = MockSession::new().with_url("https://shop.test/");
            let journey = Journey::new("checkout").with_wait(fast()).step(
                Step::new("checkout")
                    .on(Selector::css(".buy-btn"))
                    .click()
                    .or_navigate("https://shop.test/checkout")
                    .expect(url_contains("/checkout").boxed()),
            );
            let mut ctx = pipeline(&tmp).begin_test("checkout").unwrap();
            let report = journey.run(&session, &mut ctx).await;
            assert!(report.is_success());
            assert!(session.was_called("goto:https://shop.test/checkout"));
            assert!(report.outcomes[0].message.contains("navigated"));
        }

        #[tokio::test(start_paused = true)]
        async fn test_scripted_fallback_recorded() {
            let tmp = TempDir::new().unwrap();
            let session = MockSession::new().with_element(
                MockElement::new(Selector::css(".buy-btn"), ElementHandle::new("buy", "div"))
                    .native_failure(crate::error::SessionError::NotInteractable {
                        element: "buy".into(),
                        message: "obscured".into(),
                    })
                    .on_interact(MockEffect::SetUrl("https://shop.test/checkout".into())),
            );
            let journey = Journey::new("checkout").with_wait(fast()).step(
                Step::new("checkout")
                    .on(Selector::css(".buy-btn"))
                    .click()
                    .expect(url_contains("/checkout").boxed()),
            );
            let mut ctx = pipeline(&tmp).begin_test("checkout").unwrap();
            let report = journey.run(&session, &mut ctx).await;
            assert!(report.is_success());
            assert_eq!(report.outcomes[0].dispatch, Some(DispatchMode::Scripted));
        }

        #[tokio::test(start_paused = true)]
        async fn test_navigate_step() {
            let tmp = TempDir::new().unwrap();
            let session = MockSession::new();
            let journey = Journey::new("home").with_wait(fast()).step(
                Step::new("open home")
                    .goto("https://shop.test/")
                    .expect(url_contains("shop.test").boxed()),
            );
            let mut ctx = pipeline(&tmp).begin_test("home").unwrap();
            assert!(journey.run(&session, &mut ctx).await.is_success());
        }

        #[tokio::test(start_paused = true)]
        async fn test_interaction_without_target_is_invalid() {
            let tmp = TempDir::new().unwrap();
            let session = MockSession::new();
            let journey = Journey::new("bad").with_wait(fast()).step(Step::new("click").click());
            let mut ctx = pipeline(&tmp).begin_test("bad").unwrap();
            let report = journey.run(&session, &mut ctx).await;
            assert!(report.failure().unwrap().message.contains("without a target"));
        }
    }

    mod parallel_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_reports_in_input_order() {
            let tmp = TempDir::new().unwrap();
            let pipeline = pipeline(&tmp);
            let runs: Vec<(Journey, MockSession)> = (0..4)
                .map(|i| {
                    let url = format!("https://shop.test/{i}");
                    let journey = Journey::new(format!("j{i}"))
                        .with_wait(fast())
                        .step(Step::new("visit").goto(url.clone()).expect(url_contains(url).boxed()));
                    (journey, MockSession::new())
                })
                .collect();
            let reports = run_parallel(Arc::clone(&pipeline), runs).await;
            for (i, report) in reports.iter().enumerate() {
                let report = report.as_ref().unwrap();
                assert_eq!(report.journey, format!("j{i}"));
                assert!(report.is_success());
            }
            assert_eq!(pipeline.end_run().unwrap().unwrap().total, 4);
        }

        #[tokio::test(start_paused = true)]
        async fn test_journey_with_post_condition_runs_on_spawned_task() {
            let tmp = TempDir::new().unwrap();
            let pipeline = pipeline(&tmp);
            let journey = Journey::new("spawned").with_wait(fast()).step(
                Step::new("visit")
                    .goto("https://shop.test/orders")
                    .expect(url_contains("/orders").boxed()),
            );
            let handle = tokio::spawn(async move {
                let session = MockSession::new();
                let mut ctx = pipeline.begin_test("spawned").unwrap();
                journey.run(&session, &mut ctx).await
            });
            assert!(handle.await.unwrap().is_success());
        }
    }
}
