//! Advertisement targeting, frequency-capping and serving engine.
//!
//! A library-level decision engine for a content website: given a page view
//! and a slot, it decides which ads are eligible, picks or rotates among
//! them, enforces per-user frequency caps and lifetime caps, and records
//! outcomes that feed back into eligibility (auto-pause). Persistence,
//! routing and presentation are the hosting application's concern.
//!
//! # Modules
//!
//! - [`ad`]: Advertisement records, targeting rules and lifecycle states
//! - [`context`]: Clock, page visits, slot contexts and synthetic session ids
//! - [`eligibility`]: The pure eligibility resolver
//! - [`engine`]: The engine facade hosts talk to
//! - [`error`]: Error types and error handling utilities
//! - [`frequency`]: Rolling-window per-user frequency cap tracking
//! - [`injector`]: Per-page creative injection with de-duplication
//! - [`logging`]: Logging initialization
//! - [`recorder`]: Performance events and the auto-pause controller
//! - [`repository`]: Storage seam and in-memory implementation
//! - [`selection`]: Priority grouping, weighted selection and rotation
//! - [`settings`]: Configuration management
//! - [`test_support`]: Testing utilities and fixtures

pub mod ad;
pub mod context;
pub mod eligibility;
pub mod engine;
pub mod error;
pub mod frequency;
pub mod injector;
pub mod logging;
pub mod recorder;
pub mod repository;
pub mod selection;
pub mod settings;
pub mod test_support;

pub use ad::{AdType, Advertisement, Device, LifecycleState, SlotPosition, TrafficSource};
pub use context::{Clock, PageVisit, SlotContext, SystemClock};
pub use engine::{AdEngine, PageSession};
pub use error::AdServeError;
pub use recorder::EventKind;
pub use repository::{AdRepository, InMemoryAdRepository};
pub use settings::Settings;
