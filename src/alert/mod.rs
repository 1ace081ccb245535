//! Alert gating: operator mutes, debounce/hysteresis/cooldown per key, then
//! global rate limits.

pub mod mute;
pub mod rate_limit;
pub mod state_machine;

pub use mute::MuteList;
pub use rate_limit::{CooldownBudgetPolicy, DropReason, RateLimitConfig, RateLimitState, RateLimiter};
pub use state_machine::{AlertStateMachine, KeyState, Phase, Thresholds, Transition, WatchKey};
