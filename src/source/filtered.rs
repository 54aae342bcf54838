use serde_json::Value;

use crate::core::{NodeId, Token};
use crate::engine::{Node, Pipe};
use crate::error::{Flow, Halt};

type Predicate = Box<dyn FnMut(&Value) -> bool>;

/// Wraps a source and only lets through the rows matching a predicate.
///
/// The wrapped source is driven with tokens of its own, so one outer row may
/// consume any number of inner rows. Inner rows that signal a skip are passed
/// over as well. Everything downstream must read through the filtered pipe,
/// not from the wrapped source directly.
pub struct FilteredSource {
    id: NodeId,
    inner: Pipe,
    predicate: Predicate,
    counter: u64,
}

impl FilteredSource {
    pub fn new<F>(inner: &Pipe, predicate: F) -> Self
    where
        F: FnMut(&Value) -> bool + 'static,
    {
        Self {
            id: NodeId::next(),
            inner: inner.clone(),
            predicate: Box::new(predicate),
            counter: 0,
        }
    }
}

impl Node for FilteredSource {
    fn name(&self) -> String {
        "FilteredSource".into()
    }

    fn inputs(&self) -> Vec<Pipe> {
        vec![self.inner.clone()]
    }

    fn advance(&mut self, _: &Token) -> Flow<()> {
        loop {
            self.counter += 1;
            let token = Token::new(self.counter).scoped(self.id);
            let row = self.inner.advance(&token).and_then(|_| self.inner.get());
            match row {
                Ok(row) if (self.predicate)(&row) => return Ok(()),
                Ok(_) | Err(Halt::SkipRow) => continue,
                Err(halt) => return Err(halt),
            }
        }
    }

    fn get(&mut self) -> Flow<Value> {
        self.inner.get()
    }
}
