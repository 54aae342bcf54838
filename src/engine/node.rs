use std::collections::BTreeSet;

use serde_json::Value;

use crate::core::{Progress, Token};
use crate::engine::Pipe;
use crate::error::{BuildError, Flow, NodeError};

/// The contract every node in a pipeline implements.
///
/// Nodes are never driven directly. They are boxed inside a [`Pipe`], which
/// takes care of token deduplication and open/close reference counting, so
/// an implementation only needs to describe its own transition.
///
/// `advance` must bring every upstream to the new row *before* updating the
/// node's own state. `get` must never advance anything. Side effects belong
/// in `get`, which is only pulled for the parts of the graph that are
/// actually selected for the current row.
pub trait Node {
    /// Short label used in error chains and topology diagrams.
    fn name(&self) -> String;

    /// Upstream pipes, in the order they are consumed.
    fn inputs(&self) -> Vec<Pipe> {
        Vec::new()
    }

    /// Connects an upstream to a node that was built without one.
    fn attach(&mut self, _upstream: Pipe) -> Result<(), BuildError> {
        Err(BuildError::NoInlet(self.name()))
    }

    /// Moves to the row identified by `token`.
    fn advance(&mut self, token: &Token) -> Flow<()> {
        for input in self.inputs() {
            input.advance(token)?;
        }
        Ok(())
    }

    /// Value of the current row.
    fn get(&mut self) -> Flow<Value>;

    /// Identifier of the current row, if the origin has one.
    fn index(&mut self) -> Flow<Option<Value>> {
        match self.inputs().first() {
            Some(input) => input.index(),
            None => Ok(None),
        }
    }

    /// Every key this node can produce, when known ahead of time.
    fn keys(&self) -> Option<BTreeSet<String>> {
        None
    }

    fn progress(&self) -> Progress {
        match self.inputs().first() {
            Some(input) => input.progress(),
            None => Progress::default(),
        }
    }

    fn open(&mut self) -> Result<(), NodeError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), NodeError> {
        Ok(())
    }
}
