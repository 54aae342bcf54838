use std::cell::Cell;
use std::rc::Rc;

use serde_json::{Value, json};

use crate::core::{Key, Progress, Token};
use crate::engine::{Node, Pipe};
use crate::error::{Flow, NodeError, OnFail};

#[derive(Default)]
struct Slots {
    current: Cell<usize>,
    width: Cell<usize>,
}

/// Replays every row of a source once per slot.
///
/// [`RepeaterSource::take_each`] reads a different key on each replay, which
/// turns repeated columns into rows: with `take_each(["x1", "x2", "x3"])`
/// every upstream row comes out three times. Plain [`RepeaterSource::take`]
/// yields the same value on each replay. The number of replays is the
/// longest key list given to `take_each`, and the index of a row is
/// `[upstream_index, slot]`.
#[derive(Clone)]
pub struct RepeaterSource {
    pipe: Pipe,
    slots: Rc<Slots>,
}

struct RepeaterNode {
    inner: Pipe,
    slots: Rc<Slots>,
    started: bool,
}

impl Node for RepeaterNode {
    fn name(&self) -> String {
        "RepeaterSource".into()
    }

    fn inputs(&self) -> Vec<Pipe> {
        vec![self.inner.clone()]
    }

    fn advance(&mut self, token: &Token) -> Flow<()> {
        let next = self.slots.current.get() + 1;
        if self.started && next < self.slots.width.get() {
            self.slots.current.set(next);
            return Ok(());
        }

        self.inner.advance(token)?;
        self.slots.current.set(0);
        self.started = true;
        Ok(())
    }

    fn get(&mut self) -> Flow<Value> {
        self.inner.get()
    }

    fn index(&mut self) -> Flow<Option<Value>> {
        let slot = self.slots.current.get();
        Ok(self.inner.index()?.map(|index| json!([index, slot])))
    }

    fn progress(&self) -> Progress {
        let inner = self.inner.progress();
        let width = self.slots.width.get().max(1) as u64;
        let slot = self.slots.current.get() as u64;
        Progress {
            completed: inner
                .completed
                .map(|c| c.saturating_sub(1) * width + slot + u64::from(self.started)),
            total: inner.total.map(|t| t * width),
        }
    }

    fn close(&mut self) -> Result<(), NodeError> {
        self.started = false;
        self.slots.current.set(0);
        Ok(())
    }
}

struct EachNode {
    takes: Vec<Pipe>,
    slots: Rc<Slots>,
}

impl Node for EachNode {
    fn name(&self) -> String {
        format!("TakeEach({})", self.takes.len())
    }

    fn inputs(&self) -> Vec<Pipe> {
        self.takes.clone()
    }

    fn get(&mut self) -> Flow<Value> {
        match self.takes.get(self.slots.current.get()) {
            Some(take) => take.get(),
            None => Ok(Value::Null),
        }
    }
}

impl RepeaterSource {
    pub fn new(inner: &Pipe) -> Self {
        let slots = Rc::new(Slots::default());
        let pipe = Pipe::new(RepeaterNode {
            inner: inner.clone(),
            slots: slots.clone(),
            started: false,
        });
        Self { pipe, slots }
    }

    pub fn pipe(&self) -> Pipe {
        self.pipe.clone()
    }

    pub fn take(&self, key: impl Into<Key>) -> Pipe {
        self.pipe.take(key)
    }

    /// One key per replay, `null` for replays past the end of `keys`.
    pub fn take_each<I, K>(&self, keys: I) -> Pipe
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        self.take_each_with(keys, OnFail::Fail)
    }

    pub fn take_each_with<I, K>(&self, keys: I, on_fail: OnFail) -> Pipe
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        let takes: Vec<Pipe> = keys
            .into_iter()
            .map(|key| self.pipe.take_with(key, on_fail))
            .collect();
        self.slots
            .width
            .set(self.slots.width.get().max(takes.len()));
        Pipe::new(EachNode {
            takes,
            slots: self.slots.clone(),
        })
    }
}
