//! blueprint-engine: runs records through blueprints.
//!
//! - [`TransitionEngine`] -- eligibility, atomic transitions, history, SLA
//!   open/close
//! - [`EscalationScheduler`] -- periodic sweep firing SLA escalations once each
//! - [`condition`] -- guard evaluation over a field snapshot
//! - [`requirement`] -- notes, attachments and checklists a transition asks for
//! - [`action`] -- typed side effects handed to an external dispatcher
//! - [`BusinessCalendar`] / [`SlaTracker`] -- counted time and SLA progress
//!
//! Time comes from an injected [`Clock`] so everything above is
//! deterministic under test.

pub mod action;
pub mod calendar;
pub mod clock;
pub mod condition;
pub mod config;
pub mod engine;
pub mod error;
pub mod registry;
pub mod requirement;
pub mod scheduler;
pub mod sla;

pub use action::{
    ActionContext, ActionDispatcher, ActionError, ActionExecutor, ActionHandler, ActionResult,
    DispatchRequest, LoggingDispatcher, RecordingDispatcher,
};
pub use calendar::{BusinessCalendar, CountingRules};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use engine::{ExecutedAction, TransitionEngine, TransitionOutcome, TransitionSummary};
pub use error::{CalendarError, ConfigError, EngineError};
pub use registry::BlueprintRegistry;
pub use scheduler::{EscalationScheduler, SweepReport};
pub use sla::{SlaStatusView, SlaTracker, APPROACHING_THRESHOLD};
