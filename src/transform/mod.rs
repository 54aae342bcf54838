//! Built-in single-upstream transforms.
//!
//! Everything here implements [`Process`] and can be handed to
//! [`Pipe::then`] as is.

mod filter;
mod memo;
mod parse;
mod structure;

use std::collections::HashMap;

use anyhow::anyhow;
use serde_json::{Map as Object, Value};

use crate::core::{Key, render, type_name};
use crate::engine::{Node, Pipe, Process};
use crate::error::{BuildError, Flow, NodeError, OnFail};
use crate::utils::format_template;

pub use filter::{Filter, FilterKeys};
pub use memo::Memoize;
pub use parse::{
    ConvertDatetime, FormatBoolean, FormatDate, FormatDatetime, ParseBoolean, ParseDate,
    ParseDatetime,
};
pub use structure::{JoinDelimited, JoinKeyValue, JsonFormat, JsonParse, SplitDelimited, SplitKeyValue};

type MapFn = Box<dyn FnMut(Value) -> anyhow::Result<Value>>;

/// Applies a function to every value.
pub struct Map(MapFn);

impl Map {
    pub fn new<F>(mut f: F) -> Self
    where
        F: FnMut(Value) -> Value + 'static,
    {
        Self(Box::new(move |value| Ok(f(value))))
    }

    pub fn fallible<F>(f: F) -> Self
    where
        F: FnMut(Value) -> anyhow::Result<Value> + 'static,
    {
        Self(Box::new(f))
    }
}

impl Process for Map {
    fn name(&self) -> String {
        "Map".into()
    }

    fn process(&mut self, value: Value) -> Flow<Value> {
        Ok((self.0)(value)?)
    }
}

type KeyFn = Box<dyn Fn(&Value) -> Value>;

/// Translates values through a table. Values missing from the table become
/// `null`.
pub struct Lookup {
    table: HashMap<String, Value>,
    convert: Option<KeyFn>,
}

fn table_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl Lookup {
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Value>,
        V: Into<Value>,
    {
        Self {
            table: entries
                .into_iter()
                .map(|(k, v)| (table_key(&k.into()), v.into()))
                .collect(),
            convert: None,
        }
    }

    /// Like [`Lookup::new`], but both the table keys and the looked up
    /// values go through `convert` first, e.g. to ignore case.
    pub fn converted<I, K, V, F>(entries: I, convert: F) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Value>,
        V: Into<Value>,
        F: Fn(&Value) -> Value + 'static,
    {
        Self {
            table: entries
                .into_iter()
                .map(|(k, v)| (table_key(&convert(&k.into())), v.into()))
                .collect(),
            convert: Some(Box::new(convert)),
        }
    }
}

impl Process for Lookup {
    fn name(&self) -> String {
        format!("Lookup({})", self.table.len())
    }

    fn process(&mut self, value: Value) -> Flow<Value> {
        let value = match &self.convert {
            Some(convert) => convert(&value),
            None => value,
        };
        if value.is_null() {
            return Ok(Value::Null);
        }
        Ok(self.table.get(&table_key(&value)).cloned().unwrap_or_default())
    }
}

/// Renders a format string with the value.
///
/// `{}` and `{0}` stand for the value itself. When the value is an object its
/// fields are also available by name, so `"{first} {last}"` works on rows.
pub struct Template(String);

impl Template {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }
}

impl Process for Template {
    fn name(&self) -> String {
        format!("Template({:?})", self.0)
    }

    fn process(&mut self, value: Value) -> Flow<Value> {
        let kwargs = match &value {
            Value::Object(map) => map.clone(),
            _ => Object::new(),
        };
        Ok(Value::String(format_template(&self.0, &[value], &kwargs)?))
    }
}

/// Extracts a field of an object or an element of an array.
///
/// `null` goes through unchanged. A missing entry is handed to the
/// [`OnFail`] policy, which fails the row by default.
pub struct Take {
    key: Key,
    on_fail: OnFail,
}

impl Take {
    pub fn new(key: impl Into<Key>) -> Self {
        Self {
            key: key.into(),
            on_fail: OnFail::Fail,
        }
    }

    pub fn on_fail(mut self, on_fail: OnFail) -> Self {
        self.on_fail = on_fail;
        self
    }
}

impl Process for Take {
    fn name(&self) -> String {
        format!("Take({})", self.key)
    }

    fn process(&mut self, value: Value) -> Flow<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match self.key.lookup(&value) {
            Ok(Some(found)) => Ok(found.clone()),
            Ok(None) => self.on_fail.missing(&self.key),
            Err(e) => self.on_fail.handle(e.into()),
        }
    }
}

/// The index of the upstream row, `null` when the origin has none.
#[derive(Default)]
pub struct TakeIndex {
    upstream: Option<Pipe>,
}

impl TakeIndex {
    pub fn new() -> Self {
        Self { upstream: None }
    }
}

impl Node for TakeIndex {
    fn name(&self) -> String {
        "TakeIndex".into()
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
            Some(upstream) => Ok(upstream.index()?.unwrap_or_default()),
            None => Err(NodeError::Detached(self.name()).into()),
        }
    }
}

/// Replaces `null` with a fixed value.
pub struct Default(Value);

impl Default {
    pub fn new(value: impl Into<Value>) -> Self {
        Self(value.into())
    }
}

impl Process for Default {
    fn name(&self) -> String {
        format!("Default({})", self.0)
    }

    fn process(&mut self, value: Value) -> Flow<Value> {
        match value {
            Value::Null => Ok(self.0.clone()),
            value => Ok(value),
        }
    }
}

/// Logs every value at debug level and forwards it.
pub struct Inspect(String);

impl Inspect {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }
}

impl Process for Inspect {
    fn name(&self) -> String {
        format!("Inspect({:?})", self.0)
    }

    fn process(&mut self, value: Value) -> Flow<Value> {
        tracing::debug!(label = %self.0, %value, "inspect");
        Ok(value)
    }
}

/// Slices strings (by character) and arrays. Bounds are optional and
/// negative ones count from the end; a negative step walks backwards.
pub struct Slice {
    start: Option<i64>,
    stop: Option<i64>,
    step: i64,
}

impl Slice {
    pub fn new(start: Option<i64>, stop: Option<i64>) -> Self {
        Self {
            start,
            stop,
            step: 1,
        }
    }

    pub fn step(mut self, step: i64) -> Self {
        self.step = step;
        self
    }

    fn positions(&self, len: usize) -> anyhow::Result<Vec<usize>> {
        let len = len as i64;
        let clamp = |bound: i64, low: i64, high: i64| {
            let bound = if bound < 0 { bound + len } else { bound };
            bound.clamp(low, high)
        };

        let mut positions = Vec::new();
        match self.step {
            0 => return Err(anyhow!("slice step cannot be zero")),
            step if step > 0 => {
                let start = self.start.map_or(0, |s| clamp(s, 0, len));
                let stop = self.stop.map_or(len, |s| clamp(s, 0, len));
                let mut i = start;
                while i < stop {
                    positions.push(i as usize);
                    i += step;
                }
            }
            step => {
                let start = self.start.map_or(len - 1, |s| clamp(s, -1, len - 1));
                let stop = self.stop.map_or(-1, |s| clamp(s, -1, len - 1));
                let mut i = start;
                while i > stop {
                    positions.push(i as usize);
                    i += step;
                }
            }
        }
        Ok(positions)
    }
}

impl Process for Slice {
    fn name(&self) -> String {
        "Slice".into()
    }

    fn process(&mut self, value: Value) -> Flow<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::String(s) => {
                let chars: Vec<char> = s.chars().collect();
                let positions = self.positions(chars.len())?;
                Ok(Value::String(positions.into_iter().map(|i| chars[i]).collect()))
            }
            Value::Array(items) => {
                let positions = self.positions(items.len())?;
                Ok(Value::Array(
                    positions.into_iter().map(|i| items[i].clone()).collect(),
                ))
            }
            other => Err(anyhow!("cannot slice {}", type_name(&other)).into()),
        }
    }
}

/// Joins rendered values, leaving out `null`s.
pub(crate) fn join(values: impl IntoIterator<Item = Value>, delimiter: &str) -> String {
    values
        .into_iter()
        .filter(|v| !v.is_null())
        .map(|v| render(&v))
        .collect::<Vec<_>>()
        .join(delimiter)
}
