use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;

use crate::core::Token;
use crate::engine::{Node, Pipe, Put};
use crate::error::{BuildError, Flow, NodeError};
use crate::flow::{Predicate, Select};

type Options = Rc<RefCell<Vec<(Predicate, Pipe)>>>;

/// Picks the value of one of several sub-pipelines, depending on the value
/// flowing into the choice.
///
/// Each alternative is a put endpoint guarded by a predicate. The first
/// alternative whose predicate accepts the condition value is pulled, the
/// others are only advanced. Without a match the choice yields `null`.
///
/// ```
/// use micdrop::engine::{Pipe, collect};
/// use micdrop::flow::{Choose, Select};
/// use micdrop::source::{IterableSource, StaticSource};
/// use serde_json::json;
///
/// let source = Pipe::new(IterableSource::new(vec![json!(6), json!(1), json!(9)]));
/// let choice = Choose::on(&source);
/// Pipe::new(StaticSource::new(json!("six"))).then(choice.equals(6));
/// Pipe::new(StaticSource::new(json!("big"))).then(choice.check(|v| v.as_i64() > Some(6)));
/// Pipe::new(StaticSource::new(json!("small"))).then(choice.fallback());
///
/// let out = collect(&choice.pipe()).unwrap();
/// assert_eq!(out, vec![json!("six"), json!("small"), json!("big")]);
/// ```
#[derive(Clone)]
pub struct Choose {
    pipe: Pipe,
    options: Options,
}

struct ChooseNode {
    upstream: Option<Pipe>,
    options: Options,
    cache: Option<Value>,
}

impl ChooseNode {
    fn select(&self, value: &Value) -> Option<(usize, Pipe)> {
        let mut options = self.options.borrow_mut();
        options
            .iter_mut()
            .enumerate()
            .find_map(|(i, (check, put))| check(value).then(|| (i, put.clone())))
    }
}

impl Node for ChooseNode {
    fn name(&self) -> String {
        "Choose".into()
    }

    fn inputs(&self) -> Vec<Pipe> {
        self.upstream
            .iter()
            .cloned()
            .chain(self.options.borrow().iter().map(|(_, put)| put.clone()))
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
        for input in self.inputs() {
            input.advance(token)?;
        }
        Ok(())
    }

    fn get(&mut self) -> Flow<Value> {
        if let Some(value) = &self.cache {
            return Ok(value.clone());
        }

        let condition = match &self.upstream {
            Some(upstream) => upstream.get()?,
            None => return Err(NodeError::Detached(self.name()).into()),
        };

        let value = match self.select(&condition) {
            Some((i, put)) => {
                tracing::trace!(option = i, "choice selected");
                put.get()?
            }
            None => Value::Null,
        };
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

impl Choose {
    pub fn new() -> Self {
        let options = Options::default();
        let pipe = Pipe::new(ChooseNode {
            upstream: None,
            options: options.clone(),
            cache: None,
        });
        Self { pipe, options }
    }

    /// A choice driven by the values of `condition`.
    pub fn on(condition: &Pipe) -> Self {
        let choose = Self::new();
        condition.then(&choose.pipe);
        choose
    }

    /// The chosen value.
    pub fn pipe(&self) -> Pipe {
        self.pipe.clone()
    }
}

impl Default for Choose {
    fn default() -> Self {
        Self::new()
    }
}

impl Select for Choose {
    type Case = Pipe;

    /// Endpoint whose value is chosen when `predicate` accepts the condition.
    fn check<F>(&self, predicate: F) -> Pipe
    where
        F: FnMut(&Value) -> bool + 'static,
    {
        let put = Put::pipe();
        self.options
            .borrow_mut()
            .push((Box::new(predicate), put.clone()));
        put
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use serde_json::json;

    use super::*;
    use crate::engine::collect;
    use crate::flow::{SkipRow, StopProcessing};
    use crate::source::{FactorySource, IterableSource, StaticSource};

    fn counted(label: &'static str, pulls: Rc<Cell<usize>>) -> Pipe {
        Pipe::new(FactorySource::new(move || {
            pulls.set(pulls.get() + 1);
            json!(label)
        }))
    }

    #[test]
    fn test_choose_pulls_only_the_selected_option() {
        let source = Pipe::new(IterableSource::new(vec![json!("a"), json!("b"), json!("c")]));
        let choice = Choose::on(&source);
        let a_pulls = Rc::new(Cell::new(0));
        let b_pulls = Rc::new(Cell::new(0));
        counted("A", a_pulls.clone()).then(choice.equals("a"));
        counted("B", b_pulls.clone()).then(choice.is_in(["b", "x"]));

        let out = collect(&choice.pipe()).unwrap();
        assert_eq!(out, vec![json!("A"), json!("B"), Value::Null]);
        assert_eq!(a_pulls.get(), 1);
        assert_eq!(b_pulls.get(), 1);
    }

    #[test]
    fn test_choose_first_match_wins() {
        let source = Pipe::new(IterableSource::new(vec![json!(null), json!(3)]));
        let choice = Choose::on(&source);
        Pipe::new(StaticSource::new(json!("null"))).then(choice.is_null());
        Pipe::new(StaticSource::new(json!("three"))).then(choice.not_equals(4));
        Pipe::new(StaticSource::new(json!("never"))).then(choice.fallback());

        let out = collect(&choice.pipe()).unwrap();
        assert_eq!(out, vec![json!("null"), json!("three")]);
    }

    #[test]
    fn test_choose_control_options() {
        let source = Pipe::new(IterableSource::new((1..=5).map(|i| json!(i))));
        let choice = Choose::on(&source);
        Pipe::new(SkipRow).then(choice.equals(2));
        Pipe::new(StopProcessing).then(choice.equals(4));
        source.then(choice.fallback());

        let out = collect(&choice.pipe()).unwrap();
        assert_eq!(out, vec![json!(1), json!(3)]);
    }

    #[test]
    fn test_detached_choose_fails() {
        let choice = Choose::new();
        assert!(collect(&choice.pipe()).is_err());
    }
}
