use serde_json::Value;

use crate::engine::{Node, Pipe};
use crate::error::{BuildError, Flow, NodeError, OnFail};

/// Applies an [`OnFail`] policy to hard errors raised anywhere upstream.
///
/// Skip and stop signals are forwarded untouched.
pub struct FailGuard {
    upstream: Option<Pipe>,
    policy: OnFail,
}

impl FailGuard {
    pub fn new(policy: OnFail) -> Self {
        Self {
            upstream: None,
            policy,
        }
    }
}

impl Node for FailGuard {
    fn name(&self) -> String {
        format!("FailGuard({:?})", self.policy)
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
        let upstream = match &self.upstream {
            Some(upstream) => upstream,
            None => return Err(NodeError::Detached(self.name()).into()),
        };
        upstream.get().or_else(|halt| self.policy.handle(halt))
    }
}
