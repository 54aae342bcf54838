use anyhow::anyhow;
use glob::Pattern;
use serde_json::Value;

use crate::core::{is_truthy, type_name};
use crate::engine::Process;
use crate::error::{BuildError, Flow};

type ElementFn = Box<dyn FnMut(&Value) -> bool>;

/// Keeps the elements of an array accepted by a predicate, or the truthy
/// ones when built with [`Filter::truthy`].
pub struct Filter(ElementFn);

impl Filter {
    pub fn new<F>(predicate: F) -> Self
    where
        F: FnMut(&Value) -> bool + 'static,
    {
        Self(Box::new(predicate))
    }

    pub fn truthy() -> Self {
        Self::new(is_truthy)
    }
}

impl Process for Filter {
    fn name(&self) -> String {
        "Filter".into()
    }

    fn process(&mut self, value: Value) -> Flow<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Array(items) => Ok(Value::Array(
                items.into_iter().filter(|item| (self.0)(item)).collect(),
            )),
            other => Err(anyhow!("cannot filter the elements of {}", type_name(&other)).into()),
        }
    }
}

type KeyFn = Box<dyn FnMut(&str) -> bool>;

/// Keeps the entries of an object whose key is accepted by a predicate or
/// matches a glob pattern.
pub struct FilterKeys {
    label: String,
    accept: KeyFn,
}

impl FilterKeys {
    pub fn new<F>(predicate: F) -> Self
    where
        F: FnMut(&str) -> bool + 'static,
    {
        Self {
            label: "FilterKeys".into(),
            accept: Box::new(predicate),
        }
    }

    /// Keys matching `pattern`, e.g. `"addr_*"`.
    pub fn glob(pattern: &str) -> Result<Self, BuildError> {
        let compiled = Pattern::new(pattern)?;
        Ok(Self {
            label: format!("FilterKeys({pattern:?})"),
            accept: Box::new(move |key| compiled.matches(key)),
        })
    }
}

impl Process for FilterKeys {
    fn name(&self) -> String {
        self.label.clone()
    }

    fn process(&mut self, value: Value) -> Flow<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Object(map) => Ok(Value::Object(
                map.into_iter().filter(|(key, _)| (self.accept)(key)).collect(),
            )),
            other => Err(anyhow!("cannot filter the keys of {}", type_name(&other)).into()),
        }
    }
}
