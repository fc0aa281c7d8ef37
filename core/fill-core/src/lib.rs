//! # fill-core
//!
//! Field-Fill Engine for the OTP relay: finds the passcode field(s) on an
//! arbitrary page and writes a code into them the way a user would.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. The agent drives timing.
//! - **Snapshot-based**: Detection is a pure function of a [`PageSnapshot`],
//!   so every heuristic is testable without a browser.
//! - **Misses are outcomes**: A page without a usable field yields a
//!   negative [`FillOutcome`], never an error.
//! - **Scoped effects**: Visual reverts belong to the script that created
//!   them and are flushed when a newer fill starts.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fill_core::{FillEngine, MemoryPage, PageSnapshot};
//!
//! let mut page = MemoryPage::new(PageSnapshot::from_json(&json)?);
//! let outcome = FillEngine::default().fill(&mut page, "123 456");
//! ```

pub mod detect;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod page;
pub mod patterns;
pub mod script;
pub mod watch;

pub use detect::{
    detect, is_likely_otp_field, is_valid_otp_field, CandidateKind, Confidence, DetectOptions,
    FieldCandidate, Strategy,
};
pub use engine::{
    apply_best_effort, log_outcome, mask_code, normalize_code, FillEngine, FillOptions,
    FillOutcome, FillPlan, MissReason,
};
pub use error::{FillError, Result};
pub use feedback::{find_submit_control, FeedbackTimings};
pub use page::{DispatchedEvent, Element, ElementId, MemoryPage, PageContext, PageSnapshot, Rect};
pub use script::{
    DomEvent, EffectScope, FillScript, Generation, HighlightStyle, Overlay, OverlayKind, PageOp,
    TimedOp,
};
pub use watch::{LateField, MutationWatcher, Readiness};
