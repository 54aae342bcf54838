//! Destinations: nodes that assemble the final value of a row.

mod repeat;

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use anyhow::anyhow;
use serde_json::{Map, Value};

use crate::collect::Ports;
use crate::core::{Token, type_name};
use crate::engine::{Node, Pipe};
use crate::error::{BuildError, Flow};

pub use repeat::RepeaterSink;

#[derive(Default)]
struct SinkPorts {
    whole: Option<Pipe>,
    puts: Ports,
    nowhere: Vec<Pipe>,
}

impl SinkPorts {
    fn all(&self) -> Vec<Pipe> {
        self.whole
            .iter()
            .cloned()
            .chain(self.puts.all())
            .chain(self.nowhere.iter().cloned())
            .collect()
    }
}

/// Assembles named puts into one object per row.
///
/// A sink can also receive a whole row through its own pipe, in which case
/// the named puts are merged over it. Puts made with
/// [`Sink::put_nowhere`] are pulled for their side effects and discarded.
#[derive(Clone)]
pub struct Sink {
    pipe: Pipe,
    ports: Rc<RefCell<SinkPorts>>,
}

struct SinkNode {
    ports: Rc<RefCell<SinkPorts>>,
}

impl Node for SinkNode {
    fn name(&self) -> String {
        "Sink".into()
    }

    fn inputs(&self) -> Vec<Pipe> {
        self.ports.borrow().all()
    }

    fn attach(&mut self, upstream: Pipe) -> Result<(), BuildError> {
        let mut ports = self.ports.borrow_mut();
        if ports.whole.is_some() {
            return Err(BuildError::AlreadyAttached(self.name()));
        }
        ports.whole = Some(upstream);
        Ok(())
    }

    fn advance(&mut self, token: &Token) -> Flow<()> {
        for pipe in self.inputs() {
            pipe.advance(token)?;
        }
        Ok(())
    }

    fn get(&mut self) -> Flow<Value> {
        let (whole, puts, nowhere) = {
            let ports = self.ports.borrow();
            (ports.whole.clone(), ports.puts.clone(), ports.nowhere.clone())
        };

        for pipe in &nowhere {
            pipe.get()?;
        }

        let whole = match whole {
            Some(pipe) => pipe.get()?,
            None => Value::Null,
        };
        let values = puts.pull_named()?;

        Ok(match whole {
            Value::Null => Value::Object(values),
            whole if values.is_empty() => whole,
            Value::Object(mut row) => {
                row.extend(values);
                Value::Object(row)
            }
            other => {
                return Err(anyhow!(
                    "sink received a whole {} value and named puts at the same time",
                    type_name(&other)
                )
                .into());
            }
        })
    }

    fn index(&mut self) -> Flow<Option<Value>> {
        let whole = self.ports.borrow().whole.clone();
        match whole {
            Some(pipe) => pipe.index(),
            None => Ok(None),
        }
    }

    fn keys(&self) -> Option<BTreeSet<String>> {
        let ports = self.ports.borrow();
        let mut keys = ports.puts.names();
        if let Some(whole) = &ports.whole {
            keys.extend(whole.keys()?);
        }
        Some(keys)
    }
}

impl Sink {
    pub fn new() -> Self {
        let ports = Rc::new(RefCell::new(SinkPorts::default()));
        let pipe = Pipe::new(SinkNode {
            ports: ports.clone(),
        });
        Self { pipe, ports }
    }

    pub fn pipe(&self) -> Pipe {
        self.pipe.clone()
    }

    /// Endpoint for the `destination` field of the output.
    pub fn put(&self, destination: impl Into<String>) -> Pipe {
        self.ports.borrow_mut().puts.put_named(destination)
    }

    /// Endpoint whose value is computed every row but not stored.
    pub fn put_nowhere(&self) -> Pipe {
        let put = crate::engine::Put::pipe();
        self.ports.borrow_mut().nowhere.push(put.clone());
        put
    }

    pub fn keys(&self) -> Option<BTreeSet<String>> {
        self.pipe.keys()
    }
}

impl Default for Sink {
    fn default() -> Self {
        Self::new()
    }
}

enum Layout {
    List,
    Named(Vec<String>),
}

/// Drives several sinks in one loop; each row is the list (or object, when
/// the sinks are named) of their values.
pub struct MultiSink {
    sinks: Vec<Pipe>,
    layout: Layout,
}

impl MultiSink {
    pub fn new<'a>(sinks: impl IntoIterator<Item = &'a Pipe>) -> Self {
        Self {
            sinks: sinks.into_iter().cloned().collect(),
            layout: Layout::List,
        }
    }

    pub fn named<'a, S>(sinks: impl IntoIterator<Item = (S, &'a Pipe)>) -> Self
    where
        S: Into<String>,
    {
        let (names, sinks): (Vec<String>, Vec<Pipe>) = sinks
            .into_iter()
            .map(|(name, sink)| (name.into(), sink.clone()))
            .unzip();
        Self {
            sinks,
            layout: Layout::Named(names),
        }
    }
}

impl Node for MultiSink {
    fn name(&self) -> String {
        "MultiSink".into()
    }

    fn inputs(&self) -> Vec<Pipe> {
        self.sinks.clone()
    }

    fn get(&mut self) -> Flow<Value> {
        let values = self.sinks.iter().map(Pipe::get).collect::<Flow<Vec<_>>>()?;
        Ok(match &self.layout {
            Layout::List => Value::Array(values),
            Layout::Named(names) => Value::Object(
                names
                    .iter()
                    .cloned()
                    .zip(values)
                    .collect::<Map<String, Value>>(),
            ),
        })
    }
}
