use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use anyhow::anyhow;
use serde_json::{Map, Value};

use crate::collect::Ports;
use crate::core::{Token, type_name};
use crate::engine::{Node, Pipe};
use crate::error::Flow;
use crate::flatten::Flatten;

#[derive(Default)]
struct RepeatPorts {
    fixed: Ports,
    each: Ports,
}

/// Sink producing several output rows for each input row.
///
/// Fields wired through [`RepeaterSink::put_each`] must carry lists: output
/// row `i` takes element `i` of each of them, shorter lists are padded with
/// `null`. Fields wired through [`RepeaterSink::put`] are copied unchanged
/// into every output row. The sink's value is the list of output rows, empty
/// when every repeated list is; [`RepeaterSink::expanded`] yields them one by
/// one instead.
#[derive(Clone)]
pub struct RepeaterSink {
    pipe: Pipe,
    expanded: Pipe,
    ports: Rc<RefCell<RepeatPorts>>,
}

struct RepeaterSinkNode {
    ports: Rc<RefCell<RepeatPorts>>,
    cache: Option<Value>,
}

impl RepeaterSinkNode {
    fn repeat(fixed: Map<String, Value>, each: Map<String, Value>) -> Flow<Value> {
        let mut columns = Vec::with_capacity(each.len());
        for (key, value) in each {
            let items = match value {
                Value::Null => Vec::new(),
                Value::Array(items) => items,
                other => {
                    return Err(anyhow!(
                        "cannot repeat field {key:?} holding a {}",
                        type_name(&other)
                    )
                    .into());
                }
            };
            columns.push((key, items));
        }

        let count = columns.iter().map(|(_, items)| items.len()).max().unwrap_or(0);
        let rows = (0..count)
            .map(|i| {
                let mut row = fixed.clone();
                for (key, items) in &columns {
                    row.insert(key.clone(), items.get(i).cloned().unwrap_or_default());
                }
                Value::Object(row)
            })
            .collect();

        Ok(Value::Array(rows))
    }
}

impl Node for RepeaterSinkNode {
    fn name(&self) -> String {
        "RepeaterSink".into()
    }

    fn inputs(&self) -> Vec<Pipe> {
        let ports = self.ports.borrow();
        ports.fixed.all().into_iter().chain(ports.each.all()).collect()
    }

    fn advance(&mut self, token: &Token) -> Flow<()> {
        self.cache = None;
        for pipe in self.inputs() {
            pipe.advance(token)?;
        }
        Ok(())
    }

    fn get(&mut self) -> Flow<Value> {
        if let Some(value) = &self.cache {
            return Ok(value.clone());
        }

        let (fixed, each) = {
            let ports = self.ports.borrow();
            (ports.fixed.clone(), ports.each.clone())
        };
        let value = Self::repeat(fixed.pull_named()?, each.pull_named()?)?;
        self.cache = Some(value.clone());
        Ok(value)
    }

    fn keys(&self) -> Option<BTreeSet<String>> {
        let ports = self.ports.borrow();
        let mut keys = ports.fixed.names();
        keys.extend(ports.each.names());
        Some(keys)
    }
}

impl RepeaterSink {
    pub fn new() -> Self {
        let ports = Rc::new(RefCell::new(RepeatPorts::default()));
        let pipe = Pipe::new(RepeaterSinkNode {
            ports: ports.clone(),
            cache: None,
        });
        let expanded = Flatten::new(&pipe).elements();
        Self {
            pipe,
            expanded,
            ports,
        }
    }

    /// The list of output rows for the current input row.
    pub fn pipe(&self) -> Pipe {
        self.pipe.clone()
    }

    /// One output row per tick. Every call hands out the same pipe.
    pub fn expanded(&self) -> Pipe {
        self.expanded.clone()
    }

    pub fn put(&self, destination: impl Into<String>) -> Pipe {
        self.ports.borrow_mut().fixed.put_named(destination)
    }

    pub fn put_each(&self, destination: impl Into<String>) -> Pipe {
        self.ports.borrow_mut().each.put_named(destination)
    }
}

impl Default for RepeaterSink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::collect::CollectList;
    use crate::engine::collect;
    use crate::source::IterableSource;

    fn invoices() -> Pipe {
        Pipe::new(IterableSource::new(vec![
            json!({"no": 7, "lines": ["bolt", "nut", "washer"], "qty": [10, 20]}),
            json!({"no": 8, "lines": [], "qty": null}),
            json!({"no": 9, "lines": ["gear"], "qty": [1]}),
        ]))
    }

    fn wire(source: &Pipe) -> RepeaterSink {
        let sink = RepeaterSink::new();
        source.take("no").then(sink.put("invoice"));
        source.take("lines").then(sink.put_each("line"));
        source.take("qty").then(sink.put_each("qty"));
        sink
    }

    #[test]
    fn test_repeater_sink_pads_and_empties() {
        let source = invoices();
        let sink = wire(&source);

        let out = collect(&sink.pipe()).unwrap();
        assert_eq!(
            out[0],
            json!([
                {"invoice": 7, "line": "bolt", "qty": 10},
                {"invoice": 7, "line": "nut", "qty": 20},
                {"invoice": 7, "line": "washer", "qty": null},
            ])
        );
        assert_eq!(out[1], json!([]));
        assert_eq!(out[2], json!([{"invoice": 9, "line": "gear", "qty": 1}]));
        assert_eq!(
            sink.pipe().keys(),
            Some(BTreeSet::from(["invoice".into(), "line".into(), "qty".into()]))
        );
    }

    #[test]
    fn test_repeater_sink_expanded() {
        let source = invoices();
        let sink = wire(&source);

        let out = collect(&sink.expanded().take("line")).unwrap();
        assert_eq!(out, vec![json!("bolt"), json!("nut"), json!("washer"), json!("gear")]);
    }

    #[test]
    fn test_repeater_sink_expanded_shared_by_columns() {
        let source = Pipe::new(IterableSource::new(vec![
            json!({"no": 7, "lines": ["bolt", "nut"]}),
            json!({"no": 8, "lines": ["gear"]}),
            json!({"no": 9, "lines": ["cog"]}),
        ]));
        let sink = RepeaterSink::new();
        source.take("no").then(sink.put("invoice"));
        source.take("lines").then(sink.put_each("line"));

        let list = CollectList::new();
        sink.expanded().take("invoice").then(list.put());
        sink.expanded().take("line").then(list.put());

        let out = collect(&list.pipe()).unwrap();
        assert_eq!(
            out,
            vec![
                json!([7, "bolt"]),
                json!([7, "nut"]),
                json!([8, "gear"]),
                json!([9, "cog"]),
            ]
        );
    }

    #[test]
    fn test_repeater_sink_rejects_scalars() {
        let source = Pipe::new(IterableSource::new(vec![json!({"x": 1})]));
        let sink = RepeaterSink::new();
        source.take("x").then(sink.put_each("x"));

        assert!(collect(&sink.pipe()).is_err());
    }
}
