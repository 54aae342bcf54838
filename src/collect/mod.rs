//! Collector nodes: many put endpoints in, one assembled value out.

mod coalesce;
mod merge;

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::rc::Rc;

use serde_json::{Map, Value};

use crate::core::Token;
use crate::engine::{Node, Pipe, Put};
use crate::error::Flow;
use crate::utils::format_template;

pub use coalesce::{Coalesce, First};
pub use merge::{MergeDicts, MergeRules, OnConflict};

/// Positional and named put endpoints owned by a multi-input node.
#[derive(Clone, Default)]
pub(crate) struct Ports {
    pub(crate) args: Vec<Pipe>,
    pub(crate) named: Vec<(String, Pipe)>,
}

pub(crate) type SharedPorts = Rc<RefCell<Ports>>;

impl Ports {
    pub(crate) fn put(&mut self) -> Pipe {
        let put = Put::pipe();
        self.args.push(put.clone());
        put
    }

    /// Returns a fresh endpoint for `key`, replacing any previous one.
    pub(crate) fn put_named(&mut self, key: impl Into<String>) -> Pipe {
        let key = key.into();
        let put = Put::pipe();
        match self.named.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = put.clone(),
            None => self.named.push((key, put.clone())),
        }
        put
    }

    pub(crate) fn add(&mut self, pipe: Pipe) {
        self.args.push(pipe);
    }

    pub(crate) fn all(&self) -> Vec<Pipe> {
        self.args
            .iter()
            .cloned()
            .chain(self.named.iter().map(|(_, pipe)| pipe.clone()))
            .collect()
    }

    pub(crate) fn advance(&self, token: &Token) -> Flow<()> {
        for pipe in self.all() {
            pipe.advance(token)?;
        }
        Ok(())
    }

    pub(crate) fn pull_args(&self) -> Flow<Vec<Value>> {
        self.args.iter().map(Pipe::get).collect()
    }

    pub(crate) fn pull_named(&self) -> Flow<Map<String, Value>> {
        self.named
            .iter()
            .map(|(key, pipe)| Ok((key.clone(), pipe.get()?)))
            .collect()
    }

    /// The `[args, kwargs]` shape, with every slot set to `null`.
    pub(crate) fn nulls(&self) -> Value {
        let args = vec![Value::Null; self.args.len()];
        let named: Map<String, Value> = self
            .named
            .iter()
            .map(|(key, _)| (key.clone(), Value::Null))
            .collect();
        Value::Array(vec![Value::Array(args), Value::Object(named)])
    }

    pub(crate) fn names(&self) -> BTreeSet<String> {
        self.named.iter().map(|(key, _)| key.clone()).collect()
    }
}

/// How a collector turns its endpoints into one value.
pub trait Assemble {
    fn name(&self) -> String;

    fn assemble(&mut self, args: &[Pipe], named: &[(String, Pipe)]) -> Flow<Value>;

    fn keys(&self, _named: &[(String, Pipe)]) -> Option<BTreeSet<String>> {
        None
    }
}

struct CollectorNode<A> {
    ports: SharedPorts,
    cache: Option<Value>,
    assemble: A,
}

impl<A: Assemble> Node for CollectorNode<A> {
    fn name(&self) -> String {
        self.assemble.name()
    }

    fn inputs(&self) -> Vec<Pipe> {
        self.ports.borrow().all()
    }

    fn advance(&mut self, token: &Token) -> Flow<()> {
        self.cache = None;
        let ports = self.ports.borrow().clone();
        ports.advance(token)
    }

    fn get(&mut self) -> Flow<Value> {
        if let Some(value) = &self.cache {
            return Ok(value.clone());
        }

        let ports = self.ports.borrow().clone();
        let value = self.assemble.assemble(&ports.args, &ports.named)?;
        self.cache = Some(value.clone());
        Ok(value)
    }

    fn keys(&self) -> Option<BTreeSet<String>> {
        self.assemble.keys(&self.ports.borrow().named)
    }
}

/// Handle to a collector: hands out put endpoints and the collector's own
/// pipe.
///
/// The assembled value is computed once per row, however many times it is
/// pulled.
pub struct Collect<A> {
    pipe: Pipe,
    ports: SharedPorts,
    _assemble: PhantomData<A>,
}

impl<A> Clone for Collect<A> {
    fn clone(&self) -> Self {
        Self {
            pipe: self.pipe.clone(),
            ports: self.ports.clone(),
            _assemble: PhantomData,
        }
    }
}

impl<A: Assemble + 'static> Collect<A> {
    pub fn with(assemble: A) -> Self {
        let ports = SharedPorts::default();
        let pipe = Pipe::new(CollectorNode {
            ports: ports.clone(),
            cache: None,
            assemble,
        });
        Self {
            pipe,
            ports,
            _assemble: PhantomData,
        }
    }

    /// The collector's output.
    pub fn pipe(&self) -> Pipe {
        self.pipe.clone()
    }

    /// Appends an existing pipe as the next positional input.
    pub fn add(&self, pipe: &Pipe) -> &Self {
        self.ports.borrow_mut().add(pipe.clone());
        self
    }

    fn put_positional(&self) -> Pipe {
        self.ports.borrow_mut().put()
    }

    fn put_key(&self, key: impl Into<String>) -> Pipe {
        self.ports.borrow_mut().put_named(key)
    }
}

pub struct List;

impl Assemble for List {
    fn name(&self) -> String {
        "CollectList".into()
    }

    fn assemble(&mut self, args: &[Pipe], _: &[(String, Pipe)]) -> Flow<Value> {
        Ok(Value::Array(args.iter().map(Pipe::get).collect::<Flow<_>>()?))
    }
}

pub struct Dict;

impl Assemble for Dict {
    fn name(&self) -> String {
        "CollectDict".into()
    }

    fn assemble(&mut self, _: &[Pipe], named: &[(String, Pipe)]) -> Flow<Value> {
        let ports = Ports {
            args: Vec::new(),
            named: named.to_vec(),
        };
        Ok(Value::Object(ports.pull_named()?))
    }

    fn keys(&self, named: &[(String, Pipe)]) -> Option<BTreeSet<String>> {
        Some(named.iter().map(|(key, _)| key.clone()).collect())
    }
}

pub struct ArgsKwargs;

impl Assemble for ArgsKwargs {
    fn name(&self) -> String {
        "CollectArgsKwargs".into()
    }

    fn assemble(&mut self, args: &[Pipe], named: &[(String, Pipe)]) -> Flow<Value> {
        let (args, kwargs) = pull_both(args, named)?;
        Ok(Value::Array(vec![Value::Array(args), Value::Object(kwargs)]))
    }
}

pub struct Format(String);

impl Assemble for Format {
    fn name(&self) -> String {
        format!("CollectFormat({:?})", self.0)
    }

    fn assemble(&mut self, args: &[Pipe], named: &[(String, Pipe)]) -> Flow<Value> {
        let (args, kwargs) = pull_both(args, named)?;
        Ok(Value::String(format_template(&self.0, &args, &kwargs)?))
    }
}

type CallFn = Box<dyn FnMut(Vec<Value>, Map<String, Value>) -> anyhow::Result<Value>>;

pub struct Call(CallFn);

impl Assemble for Call {
    fn name(&self) -> String {
        "CollectCall".into()
    }

    fn assemble(&mut self, args: &[Pipe], named: &[(String, Pipe)]) -> Flow<Value> {
        let (args, kwargs) = pull_both(args, named)?;
        Ok((self.0)(args, kwargs)?)
    }
}

fn pull_both(args: &[Pipe], named: &[(String, Pipe)]) -> Flow<(Vec<Value>, Map<String, Value>)> {
    let ports = Ports {
        args: args.to_vec(),
        named: named.to_vec(),
    };
    Ok((ports.pull_args()?, ports.pull_named()?))
}

/// Assembles its positional puts into a list.
pub type CollectList = Collect<List>;
/// Assembles its named puts into an object.
pub type CollectDict = Collect<Dict>;
/// Assembles puts into the `[args, kwargs]` pair.
pub type CollectArgsKwargs = Collect<ArgsKwargs>;
/// Fills a format string from its puts.
pub type CollectFormat = Collect<Format>;
/// Calls a function with its puts as arguments.
pub type CollectCall = Collect<Call>;

impl Collect<List> {
    pub fn new() -> Self {
        Self::with(List)
    }

    pub fn put(&self) -> Pipe {
        self.put_positional()
    }
}

impl Default for Collect<List> {
    fn default() -> Self {
        Self::new()
    }
}

impl Collect<Dict> {
    pub fn new() -> Self {
        Self::with(Dict)
    }

    pub fn put(&self, key: impl Into<String>) -> Pipe {
        self.put_key(key)
    }
}

impl Default for Collect<Dict> {
    fn default() -> Self {
        Self::new()
    }
}

impl Collect<ArgsKwargs> {
    pub fn new() -> Self {
        Self::with(ArgsKwargs)
    }

    pub fn put(&self) -> Pipe {
        self.put_positional()
    }

    pub fn put_named(&self, key: impl Into<String>) -> Pipe {
        self.put_key(key)
    }
}

impl Default for Collect<ArgsKwargs> {
    fn default() -> Self {
        Self::new()
    }
}

impl Collect<Format> {
    pub fn new(template: impl Into<String>) -> Self {
        Self::with(Format(template.into()))
    }

    pub fn put(&self) -> Pipe {
        self.put_positional()
    }

    pub fn put_named(&self, key: impl Into<String>) -> Pipe {
        self.put_key(key)
    }
}

impl Collect<Call> {
    pub fn new<F>(f: F) -> Self
    where
        F: FnMut(Vec<Value>, Map<String, Value>) -> anyhow::Result<Value> + 'static,
    {
        Self::with(Call(Box::new(f)))
    }

    pub fn put(&self) -> Pipe {
        self.put_positional()
    }

    pub fn put_named(&self, key: impl Into<String>) -> Pipe {
        self.put_key(key)
    }
}
