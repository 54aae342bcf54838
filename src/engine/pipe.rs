use std::cell::{Cell, RefCell, RefMut};
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use anyhow::anyhow;
use serde_json::Value;

use crate::core::{Key, NodeId, Progress, Token};
use crate::engine::{Node, Process, Transform};
use crate::error::{BuildError, Flow, Halt, NodeError, OnFail};
use crate::transform::{Map, Take, TakeIndex};

/// Shared handle to a node in the graph.
///
/// Cloning a `Pipe` clones the handle, not the node: every clone refers to
/// the same node, which is how fan-out (one upstream feeding several
/// downstream nodes) is expressed. The handle owns the bookkeeping that makes
/// shared nodes safe to reach through several paths:
///
/// * the last token seen, so that repeated [`Pipe::advance`] calls with the
///   same token are no-ops,
/// * an open counter, so that [`Pipe::open`] and [`Pipe::close`] stay
///   balanced on diamonds and nested runs.
#[derive(Clone)]
pub struct Pipe(Rc<PipeInner>);

struct PipeInner {
    id: NodeId,
    last: RefCell<Option<Token>>,
    opened: Cell<usize>,
    node: RefCell<Box<dyn Node>>,
}

/// Anything that can be turned into a [`Pipe`]: an existing handle, a bare
/// node, or a [`Process`], which gets wrapped in a [`Transform`].
///
/// The marker parameter only keeps the three blanket impls apart and is
/// always inferred.
pub trait IntoPipe<Marker> {
    fn into_pipe(self) -> Pipe;
}

#[doc(hidden)]
pub struct FromPipe;
#[doc(hidden)]
pub struct FromNode;
#[doc(hidden)]
pub struct FromProcess;

impl IntoPipe<FromPipe> for Pipe {
    fn into_pipe(self) -> Pipe {
        self
    }
}

impl IntoPipe<FromPipe> for &Pipe {
    fn into_pipe(self) -> Pipe {
        self.clone()
    }
}

impl<N: Node + 'static> IntoPipe<FromNode> for N {
    fn into_pipe(self) -> Pipe {
        Pipe::new(self)
    }
}

impl<P: Process + 'static> IntoPipe<FromProcess> for P {
    fn into_pipe(self) -> Pipe {
        Pipe::new(Transform::new(self))
    }
}

impl Pipe {
    pub fn new(node: impl Node + 'static) -> Self {
        Self(Rc::new(PipeInner {
            id: NodeId::next(),
            last: RefCell::new(None),
            opened: Cell::new(0),
            node: RefCell::new(Box::new(node)),
        }))
    }

    pub fn id(&self) -> NodeId {
        self.0.id
    }

    pub fn ptr_eq(&self, other: &Pipe) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn node(&self) -> Result<RefMut<'_, Box<dyn Node>>, NodeError> {
        self.0
            .node
            .try_borrow_mut()
            .map_err(|_| anyhow!("node {} was re-entered while busy, the pipeline has a cycle", self.0.id).into())
    }

    pub fn name(&self) -> String {
        match self.0.node.try_borrow() {
            Ok(node) => node.name(),
            Err(_) => self.0.id.to_string(),
        }
    }

    pub fn inputs(&self) -> Vec<Pipe> {
        match self.0.node.try_borrow() {
            Ok(node) => node.inputs(),
            Err(_) => Vec::new(),
        }
    }

    /// Moves the node to the row identified by `token`.
    ///
    /// Does nothing if the node has already seen this token.
    pub fn advance(&self, token: &Token) -> Flow<()> {
        {
            let mut last = self.0.last.borrow_mut();
            if last.as_ref() == Some(token) {
                return Ok(());
            }
            *last = Some(token.clone());
        }
        self.node()?.advance(token)
    }

    /// Pulls the value of the current row.
    ///
    /// Errors raised by the node itself are tagged with the chain of node
    /// names leading to it and with the value it received.
    pub fn get(&self) -> Flow<Value> {
        let result = self.node()?.get();
        match result {
            Err(Halt::Failed(NodeError::Raised(source))) => Err(self.locate(source).into()),
            other => other,
        }
    }

    pub fn index(&self) -> Flow<Option<Value>> {
        self.node()?.index()
    }

    pub fn keys(&self) -> Option<BTreeSet<String>> {
        self.0.node.try_borrow().ok()?.keys()
    }

    pub fn progress(&self) -> Progress {
        match self.0.node.try_borrow() {
            Ok(node) => node.progress(),
            Err(_) => Progress::default(),
        }
    }

    /// Opens every upstream, then the node itself the first time it is
    /// reached. A node whose `open` fails is closed again right away.
    pub fn open(&self) -> Result<(), NodeError> {
        for input in self.inputs() {
            input.open()?;
        }
        if self.0.opened.get() == 0 {
            let mut node = self.node()?;
            if let Err(e) = node.open() {
                let _ = node.close();
                return Err(e);
            }
        }
        self.0.opened.set(self.0.opened.get() + 1);
        Ok(())
    }

    /// Mirror of [`Pipe::open`]. Safe to call on a node that failed to open,
    /// every upstream is still visited and the first error is returned.
    pub fn close(&self) -> Result<(), NodeError> {
        let mut result = match self.0.opened.get() {
            0 => Ok(()),
            1 => {
                self.0.opened.set(0);
                *self.0.last.borrow_mut() = None;
                self.node().and_then(|mut node| node.close())
            }
            n => {
                self.0.opened.set(n - 1);
                Ok(())
            }
        };

        for input in self.inputs() {
            if let Err(e) = input.close()
                && result.is_ok()
            {
                result = Err(e);
            }
        }

        result
    }

    pub fn is_open(&self) -> bool {
        self.0.opened.get() > 0
    }

    /// `upstream >> this >> ...`, rendered along the first input.
    pub fn chain(&self) -> String {
        match self.inputs().first() {
            Some(input) => format!("{} >> {}", input.chain(), self.name()),
            None => self.name(),
        }
    }

    fn locate(&self, source: anyhow::Error) -> NodeError {
        let value = self
            .inputs()
            .first()
            .and_then(|input| input.get().ok())
            .map(|value| value.to_string())
            .unwrap_or_else(|| "null".to_string());

        NodeError::Located {
            chain: self.chain(),
            value,
            source,
        }
    }

    /// Makes `self` the upstream of `next`.
    pub fn connect(&self, next: &Pipe) -> Result<(), BuildError> {
        next.node()
            .map_err(|_| BuildError::Cycle(next.0.id.to_string()))?
            .attach(self.clone())
    }

    /// Makes `self` the upstream of `next` and returns `next`, so pipelines
    /// read left to right.
    ///
    /// # Panics
    ///
    /// Panics if `next` refuses the upstream, for example because it is an
    /// origin or already has one. Use [`Pipe::try_then`] to handle that case.
    pub fn then<M>(&self, next: impl IntoPipe<M>) -> Pipe {
        match self.try_then(next) {
            Ok(next) => next,
            Err(e) => panic!("{e}"),
        }
    }

    pub fn try_then<M>(&self, next: impl IntoPipe<M>) -> Result<Pipe, BuildError> {
        let next = next.into_pipe();
        self.connect(&next)?;
        Ok(next)
    }

    /// Reads `key` from every value, see [`Take`].
    pub fn take(&self, key: impl Into<Key>) -> Pipe {
        self.then(Take::new(key))
    }

    pub fn take_with(&self, key: impl Into<Key>, on_fail: OnFail) -> Pipe {
        self.then(Take::new(key).on_fail(on_fail))
    }

    pub fn take_index(&self) -> Pipe {
        self.then(TakeIndex::new())
    }

    pub fn map<F>(&self, f: F) -> Pipe
    where
        F: FnMut(Value) -> Value + 'static,
    {
        self.then(Map::new(f))
    }

    pub fn try_map<F>(&self, f: F) -> Pipe
    where
        F: FnMut(Value) -> anyhow::Result<Value> + 'static,
    {
        self.then(Map::fallible(f))
    }
}

impl fmt::Debug for Pipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pipe({}, {})", self.0.id, self.name())
    }
}

impl fmt::Display for Pipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.chain())
    }
}

/// Free-standing form of [`Pipe::connect`].
pub fn connect(upstream: &Pipe, downstream: &Pipe) -> Result<(), BuildError> {
    upstream.connect(downstream)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use serde_json::json;

    use super::*;
    use crate::source::{IterableSource, StaticSource};

    struct Counting {
        upstream: Option<Pipe>,
        advances: Rc<Cell<usize>>,
        opens: Rc<Cell<usize>>,
    }

    impl Node for Counting {
        fn name(&self) -> String {
            "Counting".into()
        }

        fn inputs(&self) -> Vec<Pipe> {
            self.upstream.iter().cloned().collect()
        }

        fn attach(&mut self, upstream: Pipe) -> Result<(), BuildError> {
            self.upstream = Some(upstream);
            Ok(())
        }

        fn advance(&mut self, token: &Token) -> Flow<()> {
            self.advances.set(self.advances.get() + 1);
            if let Some(upstream) = &self.upstream {
                upstream.advance(token)?;
            }
            Ok(())
        }

        fn get(&mut self) -> Flow<Value> {
            match &self.upstream {
                Some(upstream) => upstream.get(),
                None => Ok(Value::Null),
            }
        }

        fn open(&mut self) -> Result<(), NodeError> {
            self.opens.set(self.opens.get() + 1);
            Ok(())
        }
    }

    fn counting() -> (Pipe, Rc<Cell<usize>>, Rc<Cell<usize>>) {
        let advances = Rc::new(Cell::new(0));
        let opens = Rc::new(Cell::new(0));
        let pipe = Pipe::new(Counting {
            upstream: None,
            advances: advances.clone(),
            opens: opens.clone(),
        });
        (pipe, advances, opens)
    }

    #[test]
    fn test_advance_is_idempotent_per_token() {
        let (pipe, advances, _) = counting();

        pipe.advance(&Token::new(1)).unwrap();
        pipe.advance(&Token::new(1)).unwrap();
        pipe.advance(&Token::new(1)).unwrap();
        assert_eq!(advances.get(), 1);

        pipe.advance(&Token::new(2)).unwrap();
        assert_eq!(advances.get(), 2);
    }

    #[test]
    fn test_open_close_balanced_on_diamond() {
        let (shared, _, opens) = counting();
        let left = shared.take(0);
        let right = shared.take(1);

        left.open().unwrap();
        right.open().unwrap();
        assert_eq!(opens.get(), 1);
        assert!(shared.is_open());

        left.close().unwrap();
        assert!(shared.is_open());
        right.close().unwrap();
        assert!(!shared.is_open());

        // closing again saturates
        right.close().unwrap();
        assert!(!shared.is_open());
    }

    #[test]
    fn test_then_connects_and_chains() {
        let source = Pipe::new(IterableSource::new(vec![json!({"a": {"b": 1}})]));
        let leaf = source.take("a").take("b");

        assert_eq!(leaf.chain(), "IterableSource >> Take(\"a\") >> Take(\"b\")");

        leaf.advance(&Token::new(1)).unwrap();
        assert_eq!(leaf.get().unwrap(), json!(1));
    }

    #[test]
    fn test_try_then_rejects_origin() {
        let a = Pipe::new(StaticSource::new(json!(1)));
        let b = Pipe::new(StaticSource::new(json!(2)));
        assert!(matches!(a.try_then(b), Err(BuildError::NoInlet(_))));
    }

    #[test]
    fn test_errors_are_located() {
        let source = Pipe::new(IterableSource::new(vec![json!({"a": "x"})]));
        let failing = source
            .take("a")
            .try_map(|_| Err(anyhow::anyhow!("bad value")));

        failing.advance(&Token::new(1)).unwrap();
        let err = failing.get().unwrap_err();
        let text = err.to_string();
        assert!(text.contains("IterableSource >> Take(\"a\") >> Map"), "{text}");
        assert!(text.contains("\"x\""), "{text}");
        assert!(text.contains("bad value"), "{text}");
    }
}
