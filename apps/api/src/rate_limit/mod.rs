// Per-caller request quotas over trailing hour/day windows.
// The governor is an owned component injected into the pipeline, never a global.

pub mod clock;
pub mod governor;

pub use governor::{QuotaLimits, QuotaRejection, QuotaWindow, RateGovernor, UsageStatus};
