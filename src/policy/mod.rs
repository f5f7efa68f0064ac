//! Trust and path policies consulted by the gate.

pub mod call_stack;
pub mod path;

pub use call_stack::{
    filter_untrusted, first_untrusted, is_origin_untrusted, CallStackPolicy,
    DISTRUSTED_CONTEXT_PREFIXES, DISTRUSTED_ORIGINS, SUBMISSION_ORIGIN, TRUSTED_ORIGINS,
};
pub use path::{PathAccessPolicy, PathDecision};
