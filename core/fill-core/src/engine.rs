//! The Field-Fill Engine.
//!
//! [`FillEngine::plan`] turns a page snapshot and a code into a [`FillPlan`]
//! without touching the page. [`FillEngine::fill`] plans, then applies the
//! commit half of the script through a [`PageContext`] and keeps the deferred
//! half in its effect scope until [`FillEngine::advance`] releases it.
//!
//! Hosts that run on a real clock (the agent's page workers) drive the same
//! pieces themselves: `plan`, `begin`, timed commit, `recover` on a rejected
//! write, then `take_due` as deadlines pass.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::detect::{self, CandidateKind, DetectOptions, FieldCandidate, Strategy};
use crate::error::FillError;
use crate::feedback::{self, FeedbackTimings};
use crate::page::{PageContext, PageSnapshot};
use crate::script::{
    single_field_ops, split_field_ops, EffectScope, FillScript, Generation, PageOp,
};

// ═══════════════════════════════════════════════════════════════════════════════
// Options
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FillOptions {
    pub row_tolerance_px: f64,
    pub canonical_split_len: usize,
    pub split_min: usize,
    pub split_max: usize,
    pub focus_stagger_ms: u64,
    pub highlight_ms: u64,
    pub banner_ms: u64,
    pub copy_panel_ms: u64,
    /// Retry the last failed code when a plausible field shows up later.
    /// Read by hosts; the engine itself never fills on its own.
    pub refill_on_late_field: bool,
}

impl Default for FillOptions {
    fn default() -> Self {
        Self {
            row_tolerance_px: 20.0,
            canonical_split_len: 6,
            split_min: 4,
            split_max: 8,
            focus_stagger_ms: 100,
            highlight_ms: 2000,
            banner_ms: 3000,
            copy_panel_ms: 10_000,
            refill_on_late_field: false,
        }
    }
}

impl FillOptions {
    pub fn detect_options(&self) -> DetectOptions {
        let min = self.split_min.max(1);
        DetectOptions {
            row_tolerance_px: self.row_tolerance_px,
            canonical_split_len: self.canonical_split_len,
            split_range: min..=self.split_max.max(min),
        }
    }

    pub fn timings(&self) -> FeedbackTimings {
        FeedbackTimings {
            highlight: Duration::from_millis(self.highlight_ms),
            banner: Duration::from_millis(self.banner_ms),
            copy_panel: Duration::from_millis(self.copy_panel_ms),
        }
    }

    pub fn focus_stagger(&self) -> Duration {
        Duration::from_millis(self.focus_stagger_ms)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Outcomes
// ═══════════════════════════════════════════════════════════════════════════════

/// Strips every whitespace character: `"12 34 56"` becomes `"123456"`.
pub fn normalize_code(code: &str) -> String {
    code.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Log-safe rendering of a code: the first two characters only.
pub fn mask_code(code: &str) -> String {
    let prefix: String = code.chars().take(2).collect();
    format!("{}***", prefix)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissReason {
    /// No strategy found a target.
    NoCandidate,
    /// The page was unreachable or rejected a scripted write.
    Delivery,
    /// Nothing left after whitespace normalization.
    EmptyCode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillOutcome {
    pub filled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub miss: Option<MissReason>,
}

impl FillOutcome {
    pub fn filled(strategy: Strategy, target: String) -> Self {
        Self {
            filled: true,
            strategy: Some(strategy),
            target: Some(target),
            miss: None,
        }
    }

    pub fn missed(reason: MissReason) -> Self {
        Self {
            filled: false,
            strategy: None,
            target: None,
            miss: Some(reason),
        }
    }

    /// The caller should offer the code for manual copy.
    pub fn needs_copy_fallback(&self) -> bool {
        matches!(
            self.miss,
            Some(MissReason::NoCandidate) | Some(MissReason::Delivery)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FillPlan {
    pub outcome: FillOutcome,
    pub candidate: Option<FieldCandidate>,
    pub script: FillScript,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Engine
// ═══════════════════════════════════════════════════════════════════════════════

/// One engine per page context. Owns the effect scope of the page's most
/// recent fill so that a newer attempt supersedes older visual effects.
#[derive(Debug)]
pub struct FillEngine {
    options: FillOptions,
    next_generation: u64,
    effects: EffectScope,
}

impl Default for FillEngine {
    fn default() -> Self {
        Self::new(FillOptions::default())
    }
}

impl FillEngine {
    pub fn new(options: FillOptions) -> Self {
        Self {
            options,
            next_generation: 1,
            effects: EffectScope::new(),
        }
    }

    pub fn options(&self) -> &FillOptions {
        &self.options
    }

    /// Same options and next generation, no live effects. Its plans match
    /// what this engine would produce, so planning can move to another thread.
    pub fn planner(&self) -> FillEngine {
        FillEngine {
            options: self.options.clone(),
            next_generation: self.next_generation,
            effects: EffectScope::new(),
        }
    }

    /// Runs detection and builds the script. Does not touch any page.
    pub fn plan(&self, snapshot: &PageSnapshot, code: &str) -> FillPlan {
        let generation = Generation(self.next_generation);
        let code = normalize_code(code);
        if code.is_empty() {
            return FillPlan {
                outcome: FillOutcome::missed(MissReason::EmptyCode),
                candidate: None,
                script: FillScript::new(generation),
            };
        }

        let code_len = code.chars().count();
        let Some(candidate) = detect::detect(snapshot, code_len, &self.options.detect_options())
        else {
            return self.copy_plan(generation, &code, MissReason::NoCandidate);
        };

        let mut script = FillScript::new(generation);
        script.commit = match candidate.kind {
            CandidateKind::SplitFields => {
                split_field_ops(&candidate.elements, &code, self.options.focus_stagger())
            }
            CandidateKind::SingleField => candidate
                .elements
                .first()
                .map(|element| single_field_ops(*element, &code))
                .unwrap_or_default(),
        };
        let (highlights, reverts) =
            feedback::success_ops(snapshot, &candidate, &self.options.timings());
        script.commit.extend(highlights);
        script.deferred = reverts;

        FillPlan {
            outcome: FillOutcome::filled(candidate.strategy, candidate.describe(snapshot)),
            candidate: Some(candidate),
            script: script.finish(),
        }
    }

    /// The copy-panel plan used when a planned fill could not be delivered.
    pub fn fallback_plan(&self, code: &str) -> FillPlan {
        self.copy_plan(
            Generation(self.next_generation),
            &normalize_code(code),
            MissReason::Delivery,
        )
    }

    fn copy_plan(&self, generation: Generation, code: &str, reason: MissReason) -> FillPlan {
        let mut script = FillScript::new(generation);
        let (now, later) = feedback::failure_ops(code, &self.options.timings());
        script.commit = now;
        script.deferred = later;
        FillPlan {
            outcome: FillOutcome::missed(reason),
            candidate: None,
            script: script.finish(),
        }
    }

    /// Makes `script` the current one. Returns the superseded script's pending
    /// effects, which the caller must apply before the new commit ops.
    pub fn begin(&mut self, script: &FillScript) -> Vec<PageOp> {
        self.next_generation = self.next_generation.max(script.generation.0 + 1);
        self.effects.supersede(script)
    }

    /// Deferred ops due `elapsed` after the current script began.
    pub fn take_due(&mut self, elapsed: Duration) -> Vec<PageOp> {
        self.effects.take_due(elapsed)
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.effects.next_deadline()
    }

    pub fn current_generation(&self) -> Option<Generation> {
        self.effects.generation()
    }

    /// Plans and applies a fill. Commit ops are applied back to back in
    /// order; their delays only matter to hosts that run on a clock.
    pub fn fill<P: PageContext + ?Sized>(&mut self, page: &mut P, code: &str) -> FillOutcome {
        let snapshot = match page.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, "Page snapshot unavailable, skipping fill");
                return FillOutcome::missed(MissReason::Delivery);
            }
        };

        let plan = self.plan(&snapshot, code);
        if plan.script.is_empty() {
            return plan.outcome;
        }

        apply_best_effort(page, self.begin(&plan.script));
        for timed in &plan.script.commit {
            if let Err(e) = page.apply(&timed.op) {
                return self.recover(page, code, e);
            }
        }
        log_outcome(&plan.outcome, code);
        plan.outcome
    }

    /// Switches to the copy-panel fallback after a rejected write.
    pub fn recover<P: PageContext + ?Sized>(
        &mut self,
        page: &mut P,
        code: &str,
        error: FillError,
    ) -> FillOutcome {
        tracing::warn!(error = %error, code = %mask_code(&normalize_code(code)), "Fill delivery failed, offering copy");
        let plan = self.fallback_plan(code);
        apply_best_effort(page, self.begin(&plan.script));
        apply_best_effort(page, plan.script.commit.iter().map(|timed| timed.op.clone()));
        plan.outcome
    }

    /// Applies deferred effects that are due. Returns how many were applied.
    pub fn advance<P: PageContext + ?Sized>(&mut self, page: &mut P, elapsed: Duration) -> usize {
        let due = self.take_due(elapsed);
        let count = due.len();
        apply_best_effort(page, due);
        count
    }
}

/// Visual effects are cosmetic: a failure to apply one is logged and skipped.
pub fn apply_best_effort<P, I>(page: &mut P, ops: I)
where
    P: PageContext + ?Sized,
    I: IntoIterator<Item = PageOp>,
{
    for op in ops {
        if let Err(e) = page.apply(&op) {
            tracing::debug!(error = %e, ?op, "Skipped visual effect");
        }
    }
}

pub fn log_outcome(outcome: &FillOutcome, code: &str) {
    let code = mask_code(&normalize_code(code));
    match (outcome.filled, &outcome.strategy, &outcome.target) {
        (true, Some(strategy), Some(target)) => {
            tracing::info!(?strategy, target = %target, code = %code, "OTP filled")
        }
        _ => tracing::info!(miss = ?outcome.miss, code = %code, "OTP not filled"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{Element, ElementId, MemoryPage};
    use crate::script::{Overlay, OverlayKind};

    fn labelled_page() -> (MemoryPage, ElementId) {
        let mut dom = PageSnapshot::default();
        let form = dom.push(None, Element::new("form"));
        let field = dom.push(
            Some(form),
            Element::new("input")
                .with_attr("name", "otp")
                .with_rect(0.0, 100.0, 200.0, 32.0),
        );
        (MemoryPage::new(dom), field)
    }

    #[test]
    fn planner_plans_like_its_engine() {
        let (mut page, _) = labelled_page();
        let mut engine = FillEngine::default();
        engine.fill(&mut page, "111111");

        let planned = engine.planner().plan(page.dom(), "222222");

        assert_eq!(planned, engine.plan(page.dom(), "222222"));
        assert_eq!(engine.planner().current_generation(), None);
    }

    #[test]
    fn normalize_strips_all_whitespace() {
        assert_eq!(normalize_code(" 12 34\t56\n"), "123456");
        assert_eq!(mask_code("123456"), "12***");
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: FillOptions = serde_json::from_str(r#"{"focus_stagger_ms": 50}"#).unwrap();
        assert_eq!(options.focus_stagger(), Duration::from_millis(50));
        assert_eq!(options.detect_options().split_range, 4..=8);
        assert!(!options.refill_on_late_field);
    }

    #[test]
    fn plan_does_not_touch_the_page() {
        let (page, field) = labelled_page();
        let engine = FillEngine::default();
        let plan = engine.plan(page.dom(), "654321");
        assert!(plan.outcome.filled);
        assert_eq!(plan.outcome.strategy, Some(Strategy::Labelled));
        assert_eq!(page.value(field), Some(""));
    }

    #[test]
    fn fill_writes_value_and_schedules_reverts() {
        let (mut page, field) = labelled_page();
        let mut engine = FillEngine::default();

        let outcome = engine.fill(&mut page, "654 321");
        assert!(outcome.filled);
        assert_eq!(page.value(field), Some("654321"));
        assert!(page.highlight(field).is_some());
        assert_eq!(engine.next_deadline(), Some(Duration::from_secs(2)));

        engine.advance(&mut page, Duration::from_secs(2));
        assert!(page.highlight(field).is_none());
        assert_eq!(page.overlays().len(), 1);
        engine.advance(&mut page, Duration::from_secs(3));
        assert!(page.overlays().is_empty());
    }

    #[test]
    fn empty_code_changes_nothing() {
        let (mut page, _) = labelled_page();
        let mut engine = FillEngine::default();
        let outcome = engine.fill(&mut page, "  ");
        assert_eq!(outcome.miss, Some(MissReason::EmptyCode));
        assert!(!outcome.needs_copy_fallback());
        assert!(page.events().is_empty());
        assert!(page.overlays().is_empty());
    }

    #[test]
    fn rejected_write_falls_back_to_copy_panel() {
        let (mut page, field) = labelled_page();
        page.set_reject_writes(true);
        let mut engine = FillEngine::default();

        let outcome = engine.fill(&mut page, "123456");
        assert!(!outcome.filled);
        assert_eq!(outcome.miss, Some(MissReason::Delivery));
        assert_eq!(page.value(field), Some(""));
        assert_eq!(
            page.overlays(),
            &[Overlay::CopyPanel {
                code: "123456".to_string()
            }]
        );
    }

    #[test]
    fn newer_fill_flushes_older_effects() {
        let (mut page, field) = labelled_page();
        let mut engine = FillEngine::default();
        engine.fill(&mut page, "111111");
        let first = engine.current_generation();
        assert!(page.highlight(field).is_some());

        // Second attempt: the field is filled, so nothing matches and the
        // copy panel replaces the success banner.
        let outcome = engine.fill(&mut page, "222222");
        assert!(!outcome.filled);
        assert!(engine.current_generation() > first);
        assert!(page.highlight(field).is_none());
        assert!(page
            .overlays()
            .iter()
            .all(|overlay| overlay.kind() == OverlayKind::CopyPanel));
    }
}
