//! Priority-tiered graceful degradation.
//!
//! What a section shows once its retries are spent depends only on its
//! priority: essential sections block the page, secondary sections show a
//! placeholder, optional sections disappear. [`SectionBoard`] tracks the
//! loading state of every named section on a page independently.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tunewatch_core::Priority;

use crate::config::RetryConfig;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryBehavior {
    /// Blocking error; only a full reload recovers.
    BlockingError,
    /// Neutral "unavailable" placeholder; the rest of the page keeps working.
    Placeholder,
    /// Remove the section from view without any error.
    Hide,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DegradationPolicy {
    pub priority: Priority,
    pub retry: RetryPolicy,
    pub on_exhaustion: RecoveryBehavior,
}

impl DegradationPolicy {
    pub fn for_priority(priority: Priority) -> Self {
        Self::with_retry(priority, RetryPolicy::for_priority(priority))
    }

    /// Use the configured retry budget for `priority`.
    pub fn from_config(priority: Priority, config: &RetryConfig) -> Self {
        Self::with_retry(priority, config.for_priority(priority))
    }

    fn with_retry(priority: Priority, retry: RetryPolicy) -> Self {
        let on_exhaustion = match priority {
            Priority::Essential => RecoveryBehavior::BlockingError,
            Priority::Secondary => RecoveryBehavior::Placeholder,
            Priority::Optional => RecoveryBehavior::Hide,
        };
        Self {
            priority,
            retry,
            on_exhaustion,
        }
    }

    pub fn auto_retry(&self) -> bool {
        self.retry.max_retries > 0
    }
}

// ============================================================================
// SECTION STATE
// ============================================================================

/// What the UI should render for a section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SectionView {
    Loading { progress: u8 },
    Ready,
    Error { message: String, reload_required: bool },
    Placeholder { message: String },
    Hidden,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionLoadingState {
    pub section_id: String,
    pub priority: Priority,
    /// 0-100
    pub progress: u8,
    pub error: Option<String>,
    pub is_loading: bool,
}

impl SectionLoadingState {
    fn new(section_id: &str, priority: Priority) -> Self {
        Self {
            section_id: section_id.to_string(),
            priority,
            progress: 0,
            error: None,
            is_loading: true,
        }
    }

    pub fn view(&self) -> SectionView {
        match &self.error {
            Some(message) => view_for_failure(self.priority, message),
            None if self.is_loading => SectionView::Loading {
                progress: self.progress,
            },
            None => SectionView::Ready,
        }
    }
}

fn view_for_failure(priority: Priority, message: &str) -> SectionView {
    match DegradationPolicy::for_priority(priority).on_exhaustion {
        RecoveryBehavior::BlockingError => SectionView::Error {
            message: message.to_string(),
            reload_required: true,
        },
        RecoveryBehavior::Placeholder => SectionView::Placeholder {
            message: "Unavailable right now".to_string(),
        },
        RecoveryBehavior::Hide => SectionView::Hidden,
    }
}

/// Loading state for every section of a page.
#[derive(Debug, Clone, Default)]
pub struct SectionBoard {
    sections: BTreeMap<String, SectionLoadingState>,
}

impl SectionBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin (or restart) loading a section.
    pub fn start(&mut self, section_id: &str, priority: Priority) {
        self.sections
            .insert(section_id.to_string(), SectionLoadingState::new(section_id, priority));
    }

    /// Record progress, clamped to 100. Unknown sections are ignored.
    pub fn progress(&mut self, section_id: &str, progress: u8) {
        if let Some(state) = self.sections.get_mut(section_id) {
            state.progress = progress.min(100);
        }
    }

    pub fn complete(&mut self, section_id: &str) {
        if let Some(state) = self.sections.get_mut(section_id) {
            state.progress = 100;
            state.is_loading = false;
            state.error = None;
        }
    }

    /// Mark a section failed and return what it should now render.
    pub fn fail(&mut self, section_id: &str, priority: Priority, error: impl Into<String>) -> SectionView {
        let state = self
            .sections
            .entry(section_id.to_string())
            .or_insert_with(|| SectionLoadingState::new(section_id, priority));
        state.error = Some(error.into());
        state.is_loading = false;
        let view = state.view();
        tracing::debug!(section = %section_id, priority = %state.priority, view = ?view, "section degraded");
        view
    }

    pub fn reset(&mut self, section_id: &str) -> bool {
        self.sections.remove(section_id).is_some()
    }

    pub fn reset_all(&mut self) {
        self.sections.clear();
    }

    pub fn get(&self, section_id: &str) -> Option<&SectionLoadingState> {
        self.sections.get(section_id)
    }

    pub fn view(&self, section_id: &str) -> Option<SectionView> {
        self.sections.get(section_id).map(SectionLoadingState::view)
    }

    /// Mean progress over all sections; a failed section counts as done.
    pub fn overall_progress(&self) -> u8 {
        if self.sections.is_empty() {
            return 100;
        }
        let total: u32 = self
            .sections
            .values()
            .map(|s| if s.error.is_some() { 100 } else { u32::from(s.progress) })
            .sum();
        (total / self.sections.len() as u32) as u8
    }

    pub fn is_loading(&self) -> bool {
        self.sections.values().any(|s| s.is_loading)
    }

    pub fn has_blocking_error(&self) -> bool {
        self.sections.values().any(|s| {
            s.error.is_some()
                && DegradationPolicy::for_priority(s.priority).on_exhaustion
                    == RecoveryBehavior::BlockingError
        })
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_table() {
        let essential = DegradationPolicy::for_priority(Priority::Essential);
        assert!(essential.auto_retry());
        assert_eq!(essential.retry.max_retries, 3);
        assert_eq!(essential.on_exhaustion, RecoveryBehavior::BlockingError);

        let secondary = DegradationPolicy::for_priority(Priority::Secondary);
        assert!(secondary.auto_retry());
        assert!(secondary.retry.max_retries < essential.retry.max_retries);
        assert_eq!(secondary.on_exhaustion, RecoveryBehavior::Placeholder);

        let optional = DegradationPolicy::for_priority(Priority::Optional);
        assert!(!optional.auto_retry());
        assert_eq!(optional.on_exhaustion, RecoveryBehavior::Hide);
    }

    #[test]
    fn test_progress_and_completion() {
        let mut board = SectionBoard::new();
        board.start("songs", Priority::Essential);
        board.start("genres", Priority::Optional);
        board.progress("songs", 250);
        assert_eq!(board.get("songs").unwrap().progress, 100);
        assert_eq!(board.overall_progress(), 50);
        assert_eq!(board.view("genres"), Some(SectionView::Loading { progress: 0 }));

        board.complete("songs");
        assert_eq!(board.view("songs"), Some(SectionView::Ready));
        assert!(board.is_loading());
    }

    #[test]
    fn test_failures_are_isolated() {
        let mut board = SectionBoard::new();
        board.start("songs", Priority::Essential);
        board.start("artists", Priority::Secondary);
        board.start("genres", Priority::Optional);
        board.progress("songs", 40);

        assert_eq!(board.fail("genres", Priority::Optional, "timeout"), SectionView::Hidden);
        assert!(!board.has_blocking_error());
        assert_eq!(board.view("songs"), Some(SectionView::Loading { progress: 40 }));
        assert_eq!(board.view("artists"), Some(SectionView::Loading { progress: 0 }));
        // 40 + 0 + 100
        assert_eq!(board.overall_progress(), 46);

        assert!(matches!(
            board.fail("artists", Priority::Secondary, "503"),
            SectionView::Placeholder { .. }
        ));
        assert!(!board.has_blocking_error());

        let view = board.fail("songs", Priority::Essential, "max retries reached");
        assert_eq!(
            view,
            SectionView::Error {
                message: "max retries reached".to_string(),
                reload_required: true
            }
        );
        assert!(board.has_blocking_error());
    }

    #[test]
    fn test_reset() {
        let mut board = SectionBoard::new();
        board.fail("songs", Priority::Essential, "boom");
        assert!(board.reset("songs"));
        assert!(!board.reset("songs"));
        assert!(!board.has_blocking_error());
        board.start("a", Priority::Optional);
        board.reset_all();
        assert!(board.is_empty());
        assert_eq!(board.overall_progress(), 100);
    }
}
