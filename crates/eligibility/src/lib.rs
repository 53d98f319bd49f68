//! Eligibility resolution.
//!
//! Decides, per content item, device and emulator, whether the item should
//! be deployed. Performance data is consulted first through a seven-level
//! specificity cascade; compatibility data second. Gaps in either dataset
//! are settled by catalog policy, never by guesswork, and every decision
//! carries a fixed [`ReasonCode`].

mod compatibility;
mod overrides;
mod performance;
mod reason;
mod resolver;

pub use compatibility::{CompatMatch, CompatOutcome};
pub use overrides::{EmulatorOverrides, OverrideAction, UserOverrides};
pub use performance::{PerfMatch, PerfMatchLevel, PerformanceOutcome};
pub use reason::ReasonCode;
pub use resolver::{Decision, EligibilityQuery, EligibilityResolver};
