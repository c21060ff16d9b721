//! Core library for the Anima autonomous iteration engine: the pipeline
//! stages, dispatch table, risk gate, health monitor, quota policy, and
//! the driver that sequences them. No binary lives in this crate — see
//! the `anima-cli` crate for the terminal front-end.
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod config;
pub mod dispatch;
pub mod domain;
pub mod driver;
pub mod error;
pub mod gate;
pub mod health;
pub mod history;
pub mod lock;
pub mod quota;
pub mod roadmap;
pub mod stages;
pub mod state;

pub use config::{AnimaConfig, ConfigLoader};
pub use error::{AnimaError, Result};
