//! Reusable sub-pipelines.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::anyhow;
use serde_json::Value;

use crate::core::{NodeId, Token, type_name};
use crate::engine::{Node, Pipe, Process, RunOptions, Rows};
use crate::error::{BuildError, Flow, NodeError};
use crate::source::IterableSource;

/// Origin whose value is set from outside, by whoever drives the segment.
pub struct ProxySource(Rc<RefCell<Value>>);

impl Node for ProxySource {
    fn name(&self) -> String {
        "Inlet".into()
    }

    fn get(&mut self) -> Flow<Value> {
        Ok(self.0.borrow().clone())
    }
}

/// A piece of pipeline built once around an unattached inlet and applied
/// wherever it is needed.
///
/// Every [`Segment::apply`] gets an id of its own, combined with the tokens
/// of the row it runs in. The nodes inside the segment therefore see a new
/// row each time a different application pulls them, and cache correctly
/// for each attachment point.
///
/// ```
/// use micdrop::engine::{Pipe, collect};
/// use micdrop::segment::Segment;
/// use micdrop::sink::Sink;
/// use micdrop::source::IterableSource;
/// use micdrop::transform::Template;
/// use serde_json::json;
///
/// let shout = Segment::new(|inlet| inlet.then(Template::new("{}!")));
///
/// let source = Pipe::new(IterableSource::new(vec![json!({"a": "hey", "b": "ho"})]));
/// let sink = Sink::new();
/// source.take("a").then(shout.apply()).then(sink.put("a"));
/// source.take("b").then(shout.apply()).then(sink.put("b"));
///
/// assert_eq!(collect(&sink.pipe()).unwrap(), vec![json!({"a": "hey!", "b": "ho!"})]);
/// ```
#[derive(Clone)]
pub struct Segment {
    value: Rc<RefCell<Value>>,
    inlet: Pipe,
    outlet: Pipe,
}

impl Segment {
    /// Builds the segment: `build` receives the inlet and returns the
    /// outlet.
    pub fn new<F>(build: F) -> Self
    where
        F: FnOnce(&Pipe) -> Pipe,
    {
        let value = Rc::new(RefCell::new(Value::Null));
        let inlet = Pipe::new(ProxySource(value.clone()));
        let outlet = build(&inlet);
        Self {
            value,
            inlet,
            outlet,
        }
    }

    pub fn inlet(&self) -> Pipe {
        self.inlet.clone()
    }

    pub fn outlet(&self) -> Pipe {
        self.outlet.clone()
    }

    /// A node running its upstream values through the segment.
    pub fn apply(&self) -> Applied {
        Applied {
            id: NodeId::next(),
            segment: self.clone(),
            upstream: None,
            token: None,
            cache: None,
        }
    }

    /// Runs the segment over `value` for the row identified by `token`.
    fn run(&self, value: Value, token: &Token) -> Flow<Value> {
        *self.value.borrow_mut() = value;
        self.outlet.advance(token)?;
        self.outlet.get()
    }
}

/// One application of a [`Segment`].
pub struct Applied {
    id: NodeId,
    segment: Segment,
    upstream: Option<Pipe>,
    token: Option<Token>,
    cache: Option<Value>,
}

impl Node for Applied {
    fn name(&self) -> String {
        format!("Segment({})", self.segment.outlet.name())
    }

    fn inputs(&self) -> Vec<Pipe> {
        self.upstream
            .iter()
            .cloned()
            .chain([self.segment.outlet.clone()])
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
        self.cache = None;
        self.token = Some(token.scoped(self.id));
        match &self.upstream {
            Some(upstream) => upstream.advance(token),
            None => Ok(()),
        }
    }

    fn get(&mut self) -> Flow<Value> {
        if let Some(value) = &self.cache {
            return Ok(value.clone());
        }

        let (upstream, token) = match (&self.upstream, &self.token) {
            (Some(upstream), Some(token)) => (upstream, token),
            _ => return Err(NodeError::Detached(self.name()).into()),
        };
        let value = self.segment.run(upstream.get()?, token)?;
        self.cache = Some(value.clone());
        Ok(value)
    }

    fn index(&mut self) -> Flow<Option<Value>> {
        match &self.upstream {
            Some(upstream) => upstream.index(),
            None => Ok(None),
        }
    }
}

/// Runs a segment over every element of an array and collects the results.
///
/// Each call drives a private pipeline of its own, so the segment may skip
/// elements (they are left out) or stop early (the rest is left out).
pub struct ForEach {
    segment: Segment,
}

impl ForEach {
    pub fn new(segment: &Segment) -> Self {
        Self {
            segment: segment.clone(),
        }
    }
}

impl Process for ForEach {
    fn name(&self) -> String {
        format!("ForEach({})", self.segment.outlet.name())
    }

    fn process(&mut self, value: Value) -> Flow<Value> {
        let items = match value {
            Value::Null => return Ok(Value::Null),
            Value::Array(items) => items,
            other => return Err(anyhow!("cannot iterate over {}", type_name(&other)).into()),
        };

        let source = Pipe::new(IterableSource::new(items));
        let applied = source.then(self.segment.apply());
        let options = RunOptions {
            validate: false,
            ..RunOptions::default()
        };
        let results = Rows::nested(&applied, options)
            .collect::<Result<Vec<_>, _>>()
            .map_err(anyhow::Error::from)?;
        Ok(Value::Array(results))
    }
}
