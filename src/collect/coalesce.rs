use serde_json::Value;

use crate::collect::{Assemble, Collect};
use crate::engine::Pipe;
use crate::error::Flow;

pub struct First;

impl Assemble for First {
    fn name(&self) -> String {
        "Coalesce".into()
    }

    fn assemble(&mut self, args: &[Pipe], _: &[(String, Pipe)]) -> Flow<Value> {
        for pipe in args {
            let value = pipe.get()?;
            if !value.is_null() {
                return Ok(value);
            }
        }
        Ok(Value::Null)
    }
}

/// First non-null value among its inputs.
///
/// Every input is advanced each row, but inputs after the first non-null one
/// are never pulled.
pub type Coalesce = Collect<First>;

impl Collect<First> {
    pub fn new() -> Self {
        Self::with(First)
    }

    pub fn of<'a>(pipes: impl IntoIterator<Item = &'a Pipe>) -> Self {
        let coalesce = Self::new();
        for pipe in pipes {
            coalesce.add(pipe);
        }
        coalesce
    }

    pub fn put(&self) -> Pipe {
        self.put_positional()
    }
}

impl Default for Collect<First> {
    fn default() -> Self {
        Self::new()
    }
}
