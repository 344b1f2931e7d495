//! Accept-rule routing subsystem.
//!
//! # Data Flow
//! ```text
//! Accept specs (config / CLI)
//!     → accept_rule.rs (RuleSpec expands paths × methods into AcceptRules)
//!     → router.rs (RuleSet::register: duplicate + TLS checks)
//!
//! Incoming Request (port, host, path, method)
//!     → router.rs (RuleSet::route)
//!     → accept_rule.rs (host / path / method predicates)
//!     → Return: Accept(rule) | UnknownHost | NotFound | MethodNotAllowed
//! ```
//!
//! # Design Decisions
//! - Rules are immutable once registered
//! - Host, path and method are checked separately so the caller can tell
//!   a wrong virtual host from a wrong path or method
//! - Empty condition = always matches (wildcard)
//! - First registered match wins

pub mod accept_rule;
pub mod router;

pub use accept_rule::{AcceptRule, RequestTarget, RuleSpec};
pub use router::{RouteDecision, RuleError, RuleSet};
