//! Row expansion and its inverse.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::anyhow;
use serde_json::{Value, json};

use crate::core::{NodeId, Token, type_name};
use crate::engine::{Node, Pipe};
use crate::error::{Flow, Halt, NodeError};

struct FlattenState {
    id: NodeId,
    upstream: Pipe,
    passthrough: Vec<Pipe>,
    counter: u64,
    last: Option<Token>,
    items: Vec<Value>,
    cursor: usize,
    draining: bool,
}

impl FlattenState {
    fn reset(&mut self) {
        self.last = None;
        self.items.clear();
        self.cursor = 0;
        self.draining = false;
    }

    fn current(&self) -> Value {
        match self.draining {
            true => self.items.get(self.cursor).cloned().unwrap_or_default(),
            false => Value::Null,
        }
    }
}

fn explode(value: Value) -> Flow<Vec<Value>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items),
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(key, value)| json!({"key": key, "value": value}))
            .collect()),
        other => Err(anyhow!("cannot flatten {}", type_name(&other)).into()),
    }
}

/// Moves the shared state to the row identified by `token`.
///
/// While draining, each new token moves the cursor. Once the collection is
/// used up the row is skipped and the next token pulls a new upstream row,
/// driving the upstream with tokens owned by the flatten.
fn step(state: &RefCell<FlattenState>, token: &Token) -> Flow<()> {
    let (upstream, passthrough, inner) = {
        let mut state = state.borrow_mut();
        if state.last.as_ref() == Some(token) {
            return Ok(());
        }
        state.last = Some(token.clone());

        if state.draining {
            state.cursor += 1;
            if state.cursor < state.items.len() {
                return Ok(());
            }
            state.draining = false;
            state.items.clear();
            return Err(Halt::SkipRow);
        }

        state.counter += 1;
        let inner = Token::new(state.counter).scoped(state.id);
        (state.upstream.clone(), state.passthrough.clone(), inner)
    };

    upstream.advance(&inner)?;
    for pipe in &passthrough {
        pipe.advance(&inner)?;
    }
    let items = explode(upstream.get()?)?;

    let mut state = state.borrow_mut();
    if items.is_empty() {
        return Err(Halt::SkipRow);
    }
    state.items = items;
    state.cursor = 0;
    state.draining = true;
    Ok(())
}

/// Expands a collection-valued pipe into one row per element.
///
/// An empty or `null` collection produces no rows. Objects expand into
/// `{"key": .., "value": ..}` entries. Values belonging to the upstream row,
/// like an id to repeat next to every element, must be read through
/// [`Flatten::passthrough`]: the upstream moves at its own pace, so pipes
/// reading from it directly would drift out of step.
#[derive(Clone)]
pub struct Flatten {
    state: Rc<RefCell<FlattenState>>,
    elements: Pipe,
}

struct ElementsNode {
    state: Rc<RefCell<FlattenState>>,
}

impl Node for ElementsNode {
    fn name(&self) -> String {
        "Flatten".into()
    }

    fn inputs(&self) -> Vec<Pipe> {
        vec![self.state.borrow().upstream.clone()]
    }

    fn advance(&mut self, token: &Token) -> Flow<()> {
        step(&self.state, token)
    }

    fn get(&mut self) -> Flow<Value> {
        Ok(self.state.borrow().current())
    }

    fn index(&mut self) -> Flow<Option<Value>> {
        let (upstream, cursor) = {
            let state = self.state.borrow();
            (state.upstream.clone(), state.cursor)
        };
        Ok(upstream.index()?.map(|index| json!([index, cursor])))
    }

    fn close(&mut self) -> Result<(), NodeError> {
        self.state.borrow_mut().reset();
        Ok(())
    }
}

struct PassthroughNode {
    state: Rc<RefCell<FlattenState>>,
    inner: Pipe,
}

impl Node for PassthroughNode {
    fn name(&self) -> String {
        "Passthrough".into()
    }

    fn inputs(&self) -> Vec<Pipe> {
        vec![self.inner.clone()]
    }

    fn advance(&mut self, token: &Token) -> Flow<()> {
        step(&self.state, token)
    }

    fn get(&mut self) -> Flow<Value> {
        self.inner.get()
    }
}

impl Flatten {
    pub fn new(collection: &Pipe) -> Self {
        let state = Rc::new(RefCell::new(FlattenState {
            id: NodeId::next(),
            upstream: collection.clone(),
            passthrough: Vec::new(),
            counter: 0,
            last: None,
            items: Vec::new(),
            cursor: 0,
            draining: false,
        }));
        let elements = Pipe::new(ElementsNode {
            state: state.clone(),
        });
        Self { state, elements }
    }

    /// One value per element.
    pub fn elements(&self) -> Pipe {
        self.elements.clone()
    }

    /// Exposes `pipe`, evaluated once per upstream row, next to every
    /// element of that row.
    pub fn passthrough(&self, pipe: &Pipe) -> Pipe {
        self.state.borrow_mut().passthrough.push(pipe.clone());
        Pipe::new(PassthroughNode {
            state: self.state.clone(),
            inner: pipe.clone(),
        })
    }
}

type KeyFn = Box<dyn FnMut(&Value) -> Value>;

/// Groups runs of consecutive upstream rows sharing a key into one row
/// `{"key": .., "rows": [..]}`.
///
/// Reads one row ahead, so the upstream is driven with tokens of its own.
pub struct Gather {
    id: NodeId,
    upstream: Pipe,
    key: KeyFn,
    counter: u64,
    pending: Option<Value>,
    exhausted: bool,
    current: Option<Value>,
}

impl Gather {
    pub fn new<F>(upstream: &Pipe, key: F) -> Self
    where
        F: FnMut(&Value) -> Value + 'static,
    {
        Self {
            id: NodeId::next(),
            upstream: upstream.clone(),
            key: Box::new(key),
            counter: 0,
            pending: None,
            exhausted: false,
            current: None,
        }
    }

    /// Next upstream row, or `None` once the upstream is exhausted.
    fn pull(&mut self) -> Flow<Option<Value>> {
        loop {
            self.counter += 1;
            let token = Token::new(self.counter).scoped(self.id);
            match self.upstream.advance(&token).and_then(|_| self.upstream.get()) {
                Ok(row) => return Ok(Some(row)),
                Err(Halt::SkipRow) => continue,
                Err(Halt::Exhausted) => return Ok(None),
                Err(halt) => return Err(halt),
            }
        }
    }
}

impl Node for Gather {
    fn name(&self) -> String {
        "Gather".into()
    }

    fn inputs(&self) -> Vec<Pipe> {
        vec![self.upstream.clone()]
    }

    fn advance(&mut self, _: &Token) -> Flow<()> {
        self.current = None;
        if self.exhausted {
            return Err(Halt::Exhausted);
        }

        let first = match self.pending.take() {
            Some(row) => row,
            None => match self.pull()? {
                Some(row) => row,
                None => {
                    self.exhausted = true;
                    return Err(Halt::Exhausted);
                }
            },
        };

        let key = (self.key)(&first);
        let mut rows = vec![first];
        loop {
            match self.pull()? {
                Some(row) if (self.key)(&row) == key => rows.push(row),
                Some(row) => {
                    self.pending = Some(row);
                    break;
                }
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }

        self.current = Some(json!({"key": key, "rows": rows}));
        Ok(())
    }

    fn get(&mut self) -> Flow<Value> {
        Ok(self.current.clone().unwrap_or_default())
    }

    fn index(&mut self) -> Flow<Option<Value>> {
        Ok(None)
    }

    fn close(&mut self) -> Result<(), NodeError> {
        self.pending = None;
        self.current = None;
        self.exhausted = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::engine::{RunOptions, collect, run_all};
    use crate::flow::SkipIf;
    use crate::sink::Sink;
    use crate::source::IterableSource;

    fn orders() -> Pipe {
        Pipe::new(IterableSource::new(vec![
            json!({"id": 1, "items": ["a", "b"]}),
            json!({"id": 2, "items": []}),
            json!({"id": 3, "items": null}),
            json!({"id": 4, "items": ["c", "d", "e"]}),
        ]))
    }

    #[test]
    fn test_flatten_cardinality_and_passthrough() {
        let source = orders();
        let flatten = Flatten::new(&source.take("items"));

        let sink = Sink::new();
        flatten.elements().then(sink.put("item"));
        flatten.passthrough(&source.take("id")).then(sink.put("id"));

        let out = collect(&sink.pipe()).unwrap();
        assert_eq!(
            out,
            vec![
                json!({"item": "a", "id": 1}),
                json!({"item": "b", "id": 1}),
                json!({"item": "c", "id": 4}),
                json!({"item": "d", "id": 4}),
                json!({"item": "e", "id": 4}),
            ]
        );
    }

    #[test]
    fn test_flatten_objects() {
        let source = Pipe::new(IterableSource::new(vec![json!({"x": 1, "y": 2})]));
        let flatten = Flatten::new(&source);

        let out = collect(&flatten.elements()).unwrap();
        assert_eq!(
            out,
            vec![json!({"key": "x", "value": 1}), json!({"key": "y", "value": 2})]
        );
    }

    #[test]
    fn test_flatten_rejects_scalars() {
        let source = Pipe::new(IterableSource::new(vec![json!(5)]));
        let flatten = Flatten::new(&source);
        assert!(collect(&flatten.elements()).is_err());
    }

    #[test]
    fn test_flatten_index() {
        let source = Pipe::new(IterableSource::new(vec![json!([1]), json!([2, 3])]));
        let flatten = Flatten::new(&source);

        let out = collect(&flatten.elements().take_index()).unwrap();
        assert_eq!(out, vec![json!([0, 0]), json!([1, 0]), json!([1, 1])]);
    }

    #[test]
    fn test_flatten_skip_while_draining_keeps_cursor() {
        let source = Pipe::new(IterableSource::new(vec![
            json!({"id": 1, "items": ["a", "b", "c"]}),
            json!({"id": 2, "items": ["d"]}),
        ]));
        let flatten = Flatten::new(&source.take("items"));

        let sink = Sink::new();
        flatten
            .elements()
            .then(SkipIf::equals("b"))
            .then(sink.put("item"));
        flatten.passthrough(&source.take("id")).then(sink.put("id"));

        let (out, stats) = run_all(&sink.pipe(), RunOptions::default()).unwrap();
        assert_eq!(
            out,
            vec![
                json!({"item": "a", "id": 1}),
                json!({"item": "c", "id": 1}),
                json!({"item": "d", "id": 2}),
            ]
        );
        // "b" plus one closing tick per upstream row
        assert_eq!(stats.skipped, 3);
    }

    #[test]
    fn test_gather_groups_consecutive_rows() {
        let source = Pipe::new(IterableSource::new(vec![
            json!({"k": "a", "v": 1}),
            json!({"k": "a", "v": 2}),
            json!({"k": "b", "v": 3}),
            json!({"k": "a", "v": 4}),
        ]));
        let gather = Pipe::new(Gather::new(&source, |row| row["k"].clone()));

        let out = collect(&gather.take("rows").map(|rows| {
            json!(rows.as_array().map(Vec::len).unwrap_or_default())
        }))
        .unwrap();
        assert_eq!(out, vec![json!(2), json!(1), json!(1)]);

        let keys = Pipe::new(IterableSource::new(Vec::new()));
        let empty = Pipe::new(Gather::new(&keys, |row| row.clone()));
        assert!(collect(&empty).unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn test_flatten_yields_one_row_per_element(lengths in prop::collection::vec(0usize..5, 0..8)) {
            let rows: Vec<Value> = lengths
                .iter()
                .map(|&n| json!((0..n).collect::<Vec<_>>()))
                .collect();
            let source = Pipe::new(IterableSource::new(rows));
            let flatten = Flatten::new(&source);

            let (out, stats) = run_all(&flatten.elements(), RunOptions::default()).unwrap();
            prop_assert_eq!(out.len(), lengths.iter().sum::<usize>());
            // each upstream row ends with exactly one skipped tick
            prop_assert_eq!(stats.skipped as usize, lengths.len());
        }
    }
}
