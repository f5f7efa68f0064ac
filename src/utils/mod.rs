//! Utility modules.

pub mod debug;
pub mod path;
pub mod priority;

pub use debug::{init_debug_logging, is_debug_enabled, GSBX_DEBUG_ENV};
pub use path::{
    absolutize, contains_brace_alternation, contains_glob_chars, expand_home, normalize_lexically,
};
pub use priority::PriorityBoost;
