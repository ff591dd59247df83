//! Resilient Action Dispatcher.
//!
//! Interactions go through an ordered [`DispatchPolicy`]. The default policy
//! tries native input first and then exactly one scripted dispatch of the same
//! action. Each tier is a plain branch; the dispatcher records which tier
//! succeeded and every error seen along the way.

use crate::error::{AttemptError, DispatchError, SessionError, SessionResult};
use crate::session::{ElementHandle, Interaction, Session};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// How an interaction reaches the element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Native click / typing / selection through the session
    Direct,
    /// Script-level invocation of the equivalent action
    Scripted,
}

impl DispatchMode {
    /// Lowercase name used in logs and errors
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Scripted => "scripted",
        }
    }
}

impl std::fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered dispatch tiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchPolicy {
    tiers: Vec<DispatchMode>,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            tiers: vec![DispatchMode::Direct, DispatchMode::Scripted],
        }
    }
}

impl DispatchPolicy {
    /// Policy with explicit tiers
    #[must_use]
    pub fn new(tiers: Vec<DispatchMode>) -> Self {
        Self { tiers }
    }

    /// Native input only, no fallback
    #[must_use]
    pub fn direct_only() -> Self {
        Self::new(vec![DispatchMode::Direct])
    }

    /// Tiers in the order they are tried
    #[must_use]
    pub fn tiers(&self) -> &[DispatchMode] {
        &self.tiers
    }
}

/// A dispatched interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    /// Tier that succeeded
    pub mode: DispatchMode,
    /// Errors from tiers tried before it
    pub failed_attempts: Vec<AttemptError>,
}

impl ActionOutcome {
    /// Whether a fallback tier was needed
    #[must_use]
    pub fn used_fallback(&self) -> bool {
        !self.failed_attempts.is_empty()
    }
}

/// Script performing `interaction` on the element bound to `el`
#[must_use]
pub fn script_for(interaction: &Interaction) -> String {
    match interaction {
        Interaction::Click => {
            "el.scrollIntoView({block: 'center'}); el.click(); return true;".to_string()
        }
        Interaction::Fill(value) => format!(
            "el.focus(); el.value = {}; \
             el.dispatchEvent(new Event('input', {{bubbles: true}})); \
             el.dispatchEvent(new Event('change', {{bubbles: true}})); return true;",
            js_string(value)
        ),
        Interaction::Select(value) => format!(
            "const wanted = {}; \
             const opt = Array.from(el.options || []).find(o => o.value === wanted || o.text.trim() === wanted); \
             if (!opt) {{ return false; }} \
             el.value = opt.value; \
             el.dispatchEvent(new Event('change', {{bubbles: true}})); return true;",
            js_string(value)
        ),
    }
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Performs interactions according to a [`DispatchPolicy`]
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    policy: DispatchPolicy,
}

impl Dispatcher {
    /// Dispatcher with an explicit policy
    #[must_use]
    pub const fn new(policy: DispatchPolicy) -> Self {
        Self { policy }
    }

    /// Policy in use
    #[must_use]
    pub const fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    /// Perform `interaction` on `element`, falling through the policy tiers.
    ///
    /// Not idempotent: a failure may still have changed UI state, so callers
    /// re-verify through a wait condition rather than calling again.
    pub async fn perform(
        &self,
        session: &dyn Session,
        element: &ElementHandle,
        interaction: &Interaction,
    ) -> Result<ActionOutcome, DispatchError> {
        if self.policy.tiers.is_empty() {
            return Err(DispatchError::EmptyPolicy);
        }
        let mut failed_attempts = Vec::new();
        for &mode in &self.policy.tiers {
            match Self::attempt(session, element, interaction, mode).await {
                Ok(()) => {
                    debug!(element = %element.id, %interaction, %mode, "dispatched");
                    return Ok(ActionOutcome {
                        mode,
                        failed_attempts,
                    });
                }
                Err(error) => {
                    warn!(element = %element.id, %interaction, %mode, %error, "dispatch tier failed");
                    let closed = matches!(error, SessionError::Closed);
                    failed_attempts.push(AttemptError {
                        mode: mode.to_string(),
                        error,
                    });
                    if closed {
                        break;
                    }
                }
            }
        }
        Err(DispatchError::ActionDispatchFailure {
            action: interaction.to_string(),
            element: element.id.clone(),
            attempts: failed_attempts,
        })
    }

    async fn attempt(
        session: &dyn Session,
        element: &ElementHandle,
        interaction: &Interaction,
        mode: DispatchMode,
    ) -> SessionResult<()> {
        match mode {
            DispatchMode::Direct => session.interact(element, interaction).await,
            DispatchMode::Scripted => {
                let result = session
                    .execute_script(&script_for(interaction), Some(element))
                    .await?;
                if result == serde_json::Value::Bool(false) {
                    return Err(SessionError::Script {
                        message: format!("{interaction} script reported no effect"),
                    });
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::locator::Selector;
    use crate::session::{MockEffect, MockElement, MockSession};

    fn not_interactable(id: &str) -> SessionError {
        SessionError::NotInteractable {
            element: id.into(),
            message: "element click intercepted".into(),
        }
    }

    mod policy_tests {
        use super::*;

        #[test]
        fn test_default_policy_has_one_fallback() {
            assert_eq!(
                DispatchPolicy::default().tiers(),
                &[DispatchMode::Direct, DispatchMode::Scripted]
            );
        }

        #[test]
        fn test_mode_names() {
            assert_eq!(DispatchMode::Direct.to_string(), "direct");
            assert_eq!(DispatchMode::Scripted.as_str(), "scripted");
        }

        #[test]
        fn test_fill_script_escapes_value() {
            let script = script_for(&Interaction::Fill("O'Brien \"Jr\"".into()));
            assert!(script.contains(r#""O'Brien \"Jr\"""#));
            assert!(script.contains("'input'"));
        }

        #[test]
        fn test_select_script_matches_value_or_text() {
            let script = script_for(&Interaction::Select("lowest".into()));
            assert!(script.contains("o.value === wanted"));
            assert!(script.contains("return false"));
        }
    }

    mod perform_tests {
        use super::*;

        #[tokio::test]
        async fn test_direct_success() {
            let session = MockSession::new().with_element(MockElement::new(
                Selector::id("login-btn"),
                ElementHandle::new("login", "button"),
            ));
            let outcome = Dispatcher::default()
                .perform(&session, &ElementHandle::new("login", "button"), &Interaction::Click)
                .await
                .unwrap();
            assert_eq!(outcome.mode, DispatchMode::Direct);
            assert!(!outcome.used_fallback());
            assert!(!session.was_called("script:"));
        }

        #[tokio::test]
        async fn test_not_interactable_falls_back_to_script() {
            let session = MockSession::new().with_element(
                MockElement::new(Selector::id("checkout"), ElementHandle::new("co", "div"))
                    .native_failure(not_interactable("co"))
                    .on_interact(MockEffect::SetUrl("https://shop.test/checkout".into())),
            );
            let outcome = Dispatcher::default()
                .perform(&session, &ElementHandle::new("co", "div"), &Interaction::Click)
                .await
                .unwrap();
            assert_eq!(outcome.mode, DispatchMode::Scripted);
            assert_eq!(outcome.failed_attempts.len(), 1);
            assert_eq!(
                session.current_url().await.unwrap(),
                "https://shop.test/checkout"
            );
            assert_eq!(
                session.history(),
                vec!["interact:co:click".to_string(), "script:co".to_string()]
            );
        }

        #[tokio::test]
        async fn test_both_tiers_fail() {
            let session = MockSession::new().with_element(
                MockElement::new(Selector::id("checkout"), ElementHandle::new("co", "div"))
                    .native_failure(not_interactable("co"))
                    .script_failure(SessionError::Script {
                        message: "el is null".into(),
                    }),
            );
            let err = Dispatcher::default()
                .perform(&session, &ElementHandle::new("co", "div"), &Interaction::Click)
                .await
                .unwrap_err();
            match err {
                DispatchError::ActionDispatchFailure { attempts, .. } => {
                    assert_eq!(attempts.len(), 2);
                    assert_eq!(attempts[0].mode, "direct");
                    assert_eq!(attempts[1].mode, "scripted");
                }
                DispatchError::EmptyPolicy => panic!("unexpected"),
            }
        }

        #[tokio::test]
        async fn test_direct_only_never_scripts() {
            let session = MockSession::new().with_element(
                MockElement::new(Selector::id("checkout"), ElementHandle::new("co", "div"))
                    .native_failure(not_interactable("co")),
            );
            let result = Dispatcher::new(DispatchPolicy::direct_only())
                .perform(&session, &ElementHandle::new("co", "div"), &Interaction::Click)
                .await;
            assert!(result.is_err());
            assert!(!session.was_called("script:"));
        }

        #[tokio::test]
        async fn test_closed_session_stops_after_first_tier() {
            let session = MockSession::new();
            session.close();
            let err = Dispatcher::default()
                .perform(&session, &ElementHandle::new("x", "a"), &Interaction::Click)
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                DispatchError::ActionDispatchFailure { ref attempts, .. } if attempts.len() == 1
            ));
        }

        #[tokio::test]
        async fn test_empty_policy() {
            let session = MockSession::new();
            let err = Dispatcher::new(DispatchPolicy::new(vec![]))
                .perform(&session, &ElementHandle::new("x", "a"), &Interaction::Click)
                .await
                .unwrap_err();
            assert_eq!(err, DispatchError::EmptyPolicy);
        }

        #[tokio::test]
        async fn test_fill_direct_records_value() {
            let session = MockSession::new().with_element(MockElement::new(
                Selector::id("firstNameInput"),
                ElementHandle::new("first", "input"),
            ));
            Dispatcher::default()
                .perform(
                    &session,
                    &ElementHandle::new("first", "input"),
                    &Interaction::Fill("Ada".into()),
                )
                .await
                .unwrap();
            assert_eq!(session.value_of("first").as_deref(), Some("Ada"));
        }
    }
}
