//! Error types surfaced by the tracer.
//!
//! Nothing in the walk itself returns these for bad memory; those conditions
//! degrade into output lines. These cover the sink, setup and table loading.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("failed to write backtrace: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to set up memory prober: {0}")]
    ProbeSetup(#[from] nix::Error),

    #[error("failed to parse executable: {0}")]
    Object(#[from] object::Error),

    #[error("no mapping for {0} in /proc/self/maps")]
    NoMapping(String),

    #[error("a symbol table is already installed")]
    AlreadyInstalled,
}
