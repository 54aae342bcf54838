use std::collections::BTreeSet;

use serde_json::Value;

use crate::core::Token;
use crate::engine::{Node, Pipe};
use crate::error::{BuildError, Flow, NodeError};

/// Per-value computation of a single-upstream node.
pub trait Process {
    fn name(&self) -> String;

    fn process(&mut self, value: Value) -> Flow<Value>;

    /// Called once per row, before the upstream is advanced.
    fn reset(&mut self) {}

    fn keys(&self) -> Option<BTreeSet<String>> {
        None
    }
}

/// A node with one upstream and a per-row cache.
///
/// The upstream value is pulled and processed at most once per row, no matter
/// how many downstream nodes read the result. Only successful results are
/// cached: control signals and errors are re-raised on every pull.
pub struct Transform<P> {
    upstream: Option<Pipe>,
    cache: Option<Value>,
    process: P,
}

impl<P: Process> Transform<P> {
    pub fn new(process: P) -> Self {
        Self {
            upstream: None,
            cache: None,
            process,
        }
    }

    pub fn with_upstream(upstream: Pipe, process: P) -> Self {
        Self {
            upstream: Some(upstream),
            cache: None,
            process,
        }
    }
}

impl<P: Process> Node for Transform<P> {
    fn name(&self) -> String {
        self.process.name()
    }

    fn inputs(&self) -> Vec<Pipe> {
        self.upstream.iter().cloned().collect()
    }

    fn attach(&mut self, upstream: Pipe) -> Result<(), BuildError> {
        if self.upstream.is_some() {
            return Err(BuildError::AlreadyAttached(self.name()));
        }
        self.upstream = Some(upstream);
        Ok(())
    }

    fn advance(&mut self, token: &Token) -> Flow<()> {
        self.cache = None;
        self.process.reset();
        match &self.upstream {
            Some(upstream) => upstream.advance(token),
            None => Ok(()),
        }
    }

    fn get(&mut self) -> Flow<Value> {
        if let Some(value) = &self.cache {
            return Ok(value.clone());
        }

        let input = match &self.upstream {
            Some(upstream) => upstream.get()?,
            None => return Err(NodeError::Detached(self.name()).into()),
        };

        let value = self.process.process(input)?;
        self.cache = Some(value.clone());
        Ok(value)
    }

    fn keys(&self) -> Option<BTreeSet<String>> {
        self.process.keys()
    }
}

/// An endpoint: forwards whatever is connected to it, or `null` when nothing
/// is.
///
/// Collectors, sinks and branches hand out puts so callers can wire values
/// into them with [`Pipe::then`].
#[derive(Default)]
pub struct Put {
    upstream: Option<Pipe>,
}

impl Put {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pipe() -> Pipe {
        Pipe::new(Self::new())
    }
}

impl Node for Put {
    fn name(&self) -> String {
        "Put".into()
    }

    fn inputs(&self) -> Vec<Pipe> {
        self.upstream.iter().cloned().collect()
    }

    fn attach(&mut self, upstream: Pipe) -> Result<(), BuildError> {
        if self.upstream.is_some() {
            return Err(BuildError::AlreadyAttached(self.name()));
        }
        self.upstream = Some(upstream);
        Ok(())
    }

    fn get(&mut self) -> Flow<Value> {
        match &self.upstream {
            Some(upstream) => upstream.get(),
            None => Ok(Value::Null),
        }
    }

    fn keys(&self) -> Option<BTreeSet<String>> {
        self.upstream.as_ref().and_then(Pipe::keys)
    }
}
