//! Origins: nodes without an upstream that produce the rows of a run.

mod filtered;
mod repeater;

use serde_json::{Map, Value};

use crate::core::{Progress, Token};
use crate::engine::Node;
use crate::error::{Flow, Halt};

pub use filtered::FilteredSource;
pub use repeater::RepeaterSource;

/// Yields the items of an iterator, one per row.
///
/// The index of a row is its zero-based position.
pub struct IterableSource {
    rows: Box<dyn Iterator<Item = Value>>,
    current: Option<Value>,
    position: Option<u64>,
    total: Option<u64>,
}

impl IterableSource {
    pub fn new<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: 'static,
    {
        let rows = rows.into_iter();
        let total = match rows.size_hint() {
            (lower, Some(upper)) if lower == upper => Some(lower as u64),
            _ => None,
        };
        Self {
            rows: Box::new(rows),
            current: None,
            position: None,
            total,
        }
    }
}

impl Node for IterableSource {
    fn name(&self) -> String {
        "IterableSource".into()
    }

    fn advance(&mut self, _: &Token) -> Flow<()> {
        match self.rows.next() {
            Some(row) => {
                self.current = Some(row);
                self.position = Some(self.position.map_or(0, |p| p + 1));
                Ok(())
            }
            None => {
                self.current = None;
                Err(Halt::Exhausted)
            }
        }
    }

    fn get(&mut self) -> Flow<Value> {
        Ok(self.current.clone().unwrap_or_default())
    }

    fn index(&mut self) -> Flow<Option<Value>> {
        Ok(self.position.map(Value::from))
    }

    fn progress(&self) -> Progress {
        Progress {
            completed: Some(self.position.map_or(0, |p| p + 1)),
            total: self.total,
        }
    }
}

/// Yields the values of an object, indexed by their keys.
pub struct DictSource {
    entries: std::vec::IntoIter<(String, Value)>,
    current: Option<(String, Value)>,
    completed: u64,
    total: u64,
}

impl DictSource {
    pub fn new(entries: Map<String, Value>) -> Self {
        let entries: Vec<_> = entries.into_iter().collect();
        let total = entries.len() as u64;
        Self {
            entries: entries.into_iter(),
            current: None,
            completed: 0,
            total,
        }
    }
}

impl Node for DictSource {
    fn name(&self) -> String {
        "DictSource".into()
    }

    fn advance(&mut self, _: &Token) -> Flow<()> {
        self.current = self.entries.next();
        match self.current {
            Some(_) => {
                self.completed += 1;
                Ok(())
            }
            None => Err(Halt::Exhausted),
        }
    }

    fn get(&mut self) -> Flow<Value> {
        Ok(self
            .current
            .as_ref()
            .map(|(_, value)| value.clone())
            .unwrap_or_default())
    }

    fn index(&mut self) -> Flow<Option<Value>> {
        Ok(self
            .current
            .as_ref()
            .map(|(key, _)| Value::String(key.clone())))
    }

    fn progress(&self) -> Progress {
        Progress::new(self.completed, Some(self.total))
    }
}

/// The same value on every row. Never exhausts.
pub struct StaticSource(Value);

impl StaticSource {
    pub fn new(value: Value) -> Self {
        Self(value)
    }
}

impl Node for StaticSource {
    fn name(&self) -> String {
        format!("StaticSource({})", self.0)
    }

    fn get(&mut self) -> Flow<Value> {
        Ok(self.0.clone())
    }
}

type Factory = Box<dyn FnMut() -> Flow<Value>>;

/// Calls a function once per row for its value. Never exhausts on its own.
///
/// The function runs lazily, on the first pull of a row, so rows in which
/// the source isn't needed never call it.
pub struct FactorySource {
    factory: Factory,
    cache: Option<Value>,
}

impl FactorySource {
    pub fn new<F>(mut factory: F) -> Self
    where
        F: FnMut() -> Value + 'static,
    {
        Self::fallible(move || Ok(factory()))
    }

    pub fn fallible<F>(factory: F) -> Self
    where
        F: FnMut() -> Flow<Value> + 'static,
    {
        Self {
            factory: Box::new(factory),
            cache: None,
        }
    }
}

impl Node for FactorySource {
    fn name(&self) -> String {
        "FactorySource".into()
    }

    fn advance(&mut self, _: &Token) -> Flow<()> {
        self.cache = None;
        Ok(())
    }

    fn get(&mut self) -> Flow<Value> {
        if let Some(value) = &self.cache {
            return Ok(value.clone());
        }
        let value = (self.factory)()?;
        self.cache = Some(value.clone());
        Ok(value)
    }
}
