use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::Value;

use crate::collect::Ports;
use crate::core::{Key, Token};
use crate::engine::{Node, Pipe};
use crate::error::{BuildError, Flow, NodeError};
use crate::flow::{Predicate, Select};

#[derive(Default)]
struct BranchState {
    ports: RefCell<Ports>,
    cases: RefCell<Vec<Predicate>>,
    /// Case picked for the current row, `Some(None)` when nothing matched.
    selected: Cell<Option<Option<usize>>>,
}

impl BranchState {
    fn selected(&self, branch: &Pipe) -> Flow<Option<usize>> {
        if let Some(selected) = self.selected.get() {
            return Ok(selected);
        }

        let condition = branch.get()?;
        let selected = self
            .cases
            .borrow_mut()
            .iter_mut()
            .position(|check| check(&condition));
        tracing::trace!(case = ?selected, "branch selected");
        self.selected.set(Some(selected));
        Ok(selected)
    }
}

/// Routes a set of put values to exactly one of several cases.
///
/// Values are wired into the branch with [`Branch::put`] and
/// [`Branch::put_named`]. Each case registered through [`Select`] sees them
/// as an `[args, kwargs]` pair, but only the case whose predicate first
/// accepts the condition value gets the real values. Every other case gets
/// the same shape filled with `null`, and the puts are never pulled on its
/// behalf.
#[derive(Clone)]
pub struct Branch {
    pipe: Pipe,
    state: Rc<BranchState>,
}

struct BranchNode {
    upstream: Option<Pipe>,
    state: Rc<BranchState>,
}

impl Node for BranchNode {
    fn name(&self) -> String {
        "Branch".into()
    }

    fn inputs(&self) -> Vec<Pipe> {
        self.upstream
            .iter()
            .cloned()
            .chain(self.state.ports.borrow().all())
            .collect()
    }

    fn attach(&mut self, upstream: Pipe) -> Result<(), BuildError> {
        if self.upstream.is_some() {
            return Err(BuildError::AlreadyAttached(self.name()));
        }
        self.upstream = Some(upstream);
        Ok(())
    }

    fn advance(&mut self, token: &Token) -> Flow<()> {
        self.state.selected.set(None);
        for input in self.inputs() {
            input.advance(token)?;
        }
        Ok(())
    }

    /// The condition value.
    fn get(&mut self) -> Flow<Value> {
        match &self.upstream {
            Some(upstream) => upstream.get(),
            None => Err(NodeError::Detached(self.name()).into()),
        }
    }

    fn close(&mut self) -> Result<(), NodeError> {
        self.state.selected.set(None);
        Ok(())
    }
}

/// One case of a [`Branch`].
#[derive(Clone)]
pub struct BranchCase {
    pipe: Pipe,
}

struct CaseNode {
    branch: Pipe,
    state: Rc<BranchState>,
    case: usize,
}

impl Node for CaseNode {
    fn name(&self) -> String {
        format!("BranchCase({})", self.case)
    }

    fn inputs(&self) -> Vec<Pipe> {
        vec![self.branch.clone()]
    }

    fn get(&mut self) -> Flow<Value> {
        if self.state.selected(&self.branch)? != Some(self.case) {
            return Ok(self.state.ports.borrow().nulls());
        }

        let ports = self.state.ports.borrow().clone();
        let args = ports.pull_args()?;
        let kwargs = ports.pull_named()?;
        Ok(Value::Array(vec![Value::Array(args), Value::Object(kwargs)]))
    }
}

impl BranchCase {
    /// The `[args, kwargs]` pair.
    pub fn pipe(&self) -> Pipe {
        self.pipe.clone()
    }

    /// Positional value `i`.
    pub fn arg(&self, i: i64) -> Pipe {
        self.pipe.take(0).take(Key::Index(i))
    }

    pub fn named(&self, key: impl Into<String>) -> Pipe {
        self.pipe.take(1).take(Key::Field(key.into()))
    }
}

impl Branch {
    pub fn new() -> Self {
        let state = Rc::new(BranchState::default());
        let pipe = Pipe::new(BranchNode {
            upstream: None,
            state: state.clone(),
        });
        Self { pipe, state }
    }

    /// A branch driven by the values of `condition`.
    pub fn on(condition: &Pipe) -> Self {
        let branch = Self::new();
        condition.then(&branch.pipe);
        branch
    }

    pub fn pipe(&self) -> Pipe {
        self.pipe.clone()
    }

    /// Positional endpoint, routed to the selected case.
    pub fn put(&self) -> Pipe {
        self.state.ports.borrow_mut().put()
    }

    pub fn put_named(&self, key: impl Into<String>) -> Pipe {
        self.state.ports.borrow_mut().put_named(key)
    }
}

impl Default for Branch {
    fn default() -> Self {
        Self::new()
    }
}

impl Select for Branch {
    type Case = BranchCase;

    fn check<F>(&self, predicate: F) -> BranchCase
    where
        F: FnMut(&Value) -> bool + 'static,
    {
        let case = {
            let mut cases = self.state.cases.borrow_mut();
            cases.push(Box::new(predicate));
            cases.len() - 1
        };
        BranchCase {
            pipe: Pipe::new(CaseNode {
                branch: self.pipe.clone(),
                state: self.state.clone(),
                case,
            }),
        }
    }
}
