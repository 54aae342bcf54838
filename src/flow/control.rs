use serde_json::Value;

use crate::engine::{Node, Process};
use crate::error::{Flow, Halt};
use crate::flow::{Predicate, loose_eq};

/// Origin that skips every row it is pulled for. Meant as an option of a
/// [`Choose`](crate::flow::Choose).
pub struct SkipRow;

impl Node for SkipRow {
    fn name(&self) -> String {
        "SkipRow".into()
    }

    fn get(&mut self) -> Flow<Value> {
        Err(Halt::SkipRow)
    }
}

/// Origin that stops processing as soon as it is pulled.
pub struct StopProcessing;

impl Node for StopProcessing {
    fn name(&self) -> String {
        "StopProcessing".into()
    }

    fn get(&mut self) -> Flow<Value> {
        Err(Halt::StopProcessing)
    }
}

/// Skips the row when the predicate accepts the value, forwards it otherwise.
pub struct SkipIf {
    label: &'static str,
    predicate: Predicate,
}

impl SkipIf {
    pub fn new<F>(predicate: F) -> Self
    where
        F: FnMut(&Value) -> bool + 'static,
    {
        Self {
            label: "SkipIf",
            predicate: Box::new(predicate),
        }
    }

    /// Skips rows carrying `sentinel`.
    pub fn equals(sentinel: impl Into<Value>) -> Self {
        let sentinel = sentinel.into();
        Self {
            label: "SkipIfEquals",
            predicate: Box::new(move |value| loose_eq(value, &sentinel)),
        }
    }

    /// Skips every row not carrying `sentinel`.
    pub fn not_equals(sentinel: impl Into<Value>) -> Self {
        let sentinel = sentinel.into();
        Self {
            label: "SkipUnlessEquals",
            predicate: Box::new(move |value| !loose_eq(value, &sentinel)),
        }
    }
}

impl Process for SkipIf {
    fn name(&self) -> String {
        self.label.into()
    }

    fn process(&mut self, value: Value) -> Flow<Value> {
        match (self.predicate)(&value) {
            true => Err(Halt::SkipRow),
            false => Ok(value),
        }
    }
}

/// Stops processing when the predicate accepts the value, forwards it
/// otherwise.
pub struct StopIf {
    label: &'static str,
    predicate: Predicate,
}

impl StopIf {
    pub fn new<F>(predicate: F) -> Self
    where
        F: FnMut(&Value) -> bool + 'static,
    {
        Self {
            label: "StopIf",
            predicate: Box::new(predicate),
        }
    }

    pub fn equals(sentinel: impl Into<Value>) -> Self {
        let sentinel = sentinel.into();
        Self {
            label: "StopIfEquals",
            predicate: Box::new(move |value| loose_eq(value, &sentinel)),
        }
    }

    pub fn not_equals(sentinel: impl Into<Value>) -> Self {
        let sentinel = sentinel.into();
        Self {
            label: "StopUnlessEquals",
            predicate: Box::new(move |value| !loose_eq(value, &sentinel)),
        }
    }
}

impl Process for StopIf {
    fn name(&self) -> String {
        self.label.into()
    }

    fn process(&mut self, value: Value) -> Flow<Value> {
        match (self.predicate)(&value) {
            true => Err(Halt::StopProcessing),
            false => Ok(value),
        }
    }
}

/// Skips a row whose value equals the one of the previous row that got
/// through.
#[derive(Default)]
pub struct SkipIfRepeat {
    last: Option<Value>,
}

impl SkipIfRepeat {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Process for SkipIfRepeat {
    fn name(&self) -> String {
        "SkipIfRepeat".into()
    }

    fn process(&mut self, value: Value) -> Flow<Value> {
        if self.last.as_ref() == Some(&value) {
            return Err(Halt::SkipRow);
        }
        self.last = Some(value.clone());
        Ok(value)
    }
}

/// Stops processing at the first value equal to the previous one.
#[derive(Default)]
pub struct StopIfRepeat {
    last: Option<Value>,
}

impl StopIfRepeat {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Process for StopIfRepeat {
    fn name(&self) -> String {
        "StopIfRepeat".into()
    }

    fn process(&mut self, value: Value) -> Flow<Value> {
        if self.last.as_ref() == Some(&value) {
            return Err(Halt::StopProcessing);
        }
        self.last = Some(value.clone());
        Ok(value)
    }
}
