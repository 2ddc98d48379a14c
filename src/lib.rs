//! An embeddable interpreter for a C subset, with host hooks for
//! proof-of-work scripts.

pub mod computation;
pub mod dsl;
pub mod error;
pub mod files;
pub mod settings;
pub mod state;
