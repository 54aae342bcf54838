//! The evaluation engine: the node contract, the shared [`Pipe`] handle,
//! the caching [`Transform`] node, graph inspection and the driver loop.

mod node;
mod pipe;
mod runner;
mod topology;
mod transform;

pub use crate::engine::node::Node;
pub use crate::engine::pipe::{IntoPipe, Pipe, connect};
pub use crate::engine::runner::{RunOptions, RunStats, Rows, StopReason, collect, run, run_all};
pub use crate::engine::topology::Topology;
pub use crate::engine::transform::{Process, Put, Transform};
