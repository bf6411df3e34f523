//! Scheduler module
//!
//! Cooldown gating for signal evaluation: per-symbol cooldowns, an adaptive
//! multiplier that grows with losses, and a global pause after loss streaks.

mod cooldown;

pub use cooldown::CooldownScheduler;
