//! Route handlers, one module per endpoint family.

pub mod capabilities;
pub mod discover;
pub mod dispatch_support;
pub mod do_chain;
pub mod do_single;
pub mod health;
pub mod mcp;
pub mod providers;
pub mod status;
pub mod usage;
