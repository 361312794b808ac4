// src/config/mod.rs

//! External collaborator inputs: trio metadata (CSV), per-phase scheduler
//! resources (JSON), and the immutable per-invocation [`RunContext`].
//!
//! All validation happens here, before any job is submitted. Configuration
//! errors are fatal and reported up front.

pub mod context;
pub mod metadata;
pub mod resources;

pub use context::RunContext;
pub use metadata::{GenomeInputs, Sex, Trio, load_metadata};
pub use resources::{ResourceConfig, load_resources};
