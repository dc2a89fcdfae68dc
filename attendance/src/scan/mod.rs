pub mod assembler;
pub mod cooldown;
pub mod matcher;

pub use assembler::{TokenAssembler, pump_tokens};
pub use cooldown::CooldownGuard;
pub use matcher::{ScanMatcher, normalize_token};
