#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod collect;
pub mod core;
pub mod engine;
mod error;
pub mod flatten;
pub mod flow;
pub mod segment;
pub mod sink;
pub mod source;
pub mod transform;
mod utils;

pub use crate::core::{Key, NodeId, Progress, Token, compare, is_truthy, render};
pub use crate::engine::{IntoPipe, Node, Pipe, Process, RunOptions, RunStats, Rows, StopReason, collect, run, run_all};
pub use crate::error::*;
pub use crate::utils::format_template;
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
