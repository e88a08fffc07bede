//! Command implementations.
//!
//! Each group of subcommands lives in its own module.

pub(crate) mod dump;
pub(crate) mod flash;
pub(crate) mod info;
