//! Concrete adapters for the ports `anima-core` declares but does not
//! implement. These are the thin, real-world front end: deliberately
//! small, since the interesting design lives in the core.

mod agent;
mod filesystem;
mod vcs;

pub use agent::SubprocessAgent;
pub use filesystem::LocalFileSystem;
pub use vcs::GitVersionControl;
