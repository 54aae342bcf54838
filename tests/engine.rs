use std::cell::Cell;
use std::rc::Rc;

use micdrop::collect::{CollectCall, CollectDict, CollectList, MergeDicts, MergeRules};
use micdrop::engine::{Pipe, RunOptions, collect, run_all};
use micdrop::flatten::Flatten;
use micdrop::flow::{Branch, Choose, Select, SkipIf};
use micdrop::sink::Sink;
use micdrop::source::{FactorySource, IterableSource, StaticSource};
use micdrop::{Halt, Token};
use proptest::prelude::*;
use serde_json::{Value, json};

fn counter() -> (Rc<Cell<usize>>, Rc<Cell<usize>>) {
    let count = Rc::new(Cell::new(0));
    (count.clone(), count)
}

fn numbers(values: Vec<i64>) -> Pipe {
    Pipe::new(IterableSource::new(values.into_iter().map(Value::from).collect::<Vec<_>>()))
}

/// Drives `root` by hand, repeating every token `repeats` times.
fn drive_repeated(root: &Pipe, repeats: usize) -> Vec<Value> {
    let mut out = Vec::new();
    root.open().unwrap();
    for tick in 1.. {
        let token = Token::new(tick);
        let mut advanced = Ok(());
        for _ in 0..repeats {
            advanced = advanced.and_then(|()| root.advance(&token));
        }
        match advanced.and_then(|()| root.get()) {
            Ok(value) => out.push(value),
            Err(Halt::SkipRow) => continue,
            Err(Halt::Exhausted) => break,
            Err(e) => panic!("unexpected halt: {e}"),
        }
    }
    root.close().unwrap();
    out
}

proptest! {
    #[test]
    fn test_advance_is_idempotent(values in prop::collection::vec(-100i64..100, 0..20), repeats in 1usize..4) {
        let (calls, seen) = counter();
        let source = numbers(values.clone());
        let doubled = source.map(move |v| {
            seen.set(seen.get() + 1);
            json!(v.as_i64().unwrap_or_default() * 2)
        });
        let list = CollectList::new();
        source.then(list.put());
        doubled.then(list.put());

        let out = drive_repeated(&list.pipe(), repeats);

        let expected: Vec<Value> = values.iter().map(|v| json!([v, v * 2])).collect();
        prop_assert_eq!(out, expected);
        prop_assert_eq!(calls.get(), values.len());
    }

    #[test]
    fn test_flatten_passthrough_is_constant(lengths in prop::collection::vec(0usize..4, 1..6)) {
        let rows: Vec<Value> = lengths
            .iter()
            .enumerate()
            .map(|(id, &n)| json!({"id": id, "items": (0..n).collect::<Vec<_>>()}))
            .collect();
        let source = Pipe::new(IterableSource::new(rows));
        let flatten = Flatten::new(&source.take("items"));

        let sink = Sink::new();
        flatten.elements().then(sink.put("item"));
        flatten.passthrough(&source.take("id")).then(sink.put("id"));

        let out = collect(&sink.pipe()).unwrap();
        let expected: Vec<Value> = lengths
            .iter()
            .enumerate()
            .flat_map(|(id, &n)| (0..n).map(move |item| json!({"item": item, "id": id})))
            .collect();
        prop_assert_eq!(out, expected);
    }
}

#[test]
fn test_diamond_evaluates_shared_node_once() {
    let (calls, seen) = counter();
    let source = numbers(vec![1, 2, 3]);
    let shared = source.map(move |v| {
        seen.set(seen.get() + 1);
        v
    });
    let left = shared.map(|v| json!(v.as_i64().unwrap_or_default() + 1));
    let right = shared.map(|v| json!(v.as_i64().unwrap_or_default() * 10));

    let list = CollectList::new();
    left.then(list.put());
    right.then(list.put());

    let out = collect(&list.pipe()).unwrap();
    assert_eq!(out, vec![json!([2, 10]), json!([3, 20]), json!([4, 30])]);
    assert_eq!(calls.get(), 3);
}

#[test]
fn test_branch_exclusivity() {
    let (pulls, seen) = counter();
    let source = Pipe::new(IterableSource::new(vec![
        json!({"kind": "a", "x": 1}),
        json!({"kind": "b", "x": 2}),
        json!({"kind": "z", "x": 3}),
    ]));
    let branch = Branch::on(&source.take("kind"));
    source.take("x").then(branch.put());
    Pipe::new(FactorySource::new(move || {
        seen.set(seen.get() + 1);
        json!("expensive")
    }))
    .then(branch.put_named("extra"));

    let sink = Sink::new();
    let a = branch.equals("a");
    a.arg(0).then(sink.put("a"));
    a.named("extra").then(sink.put("a_extra"));
    let b = branch.equals("b");
    b.arg(0).then(sink.put("b"));
    b.named("extra").then(sink.put("b_extra"));

    let out = collect(&sink.pipe()).unwrap();
    assert_eq!(
        out,
        vec![
            json!({"a": 1, "a_extra": "expensive", "b": null, "b_extra": null}),
            json!({"a": null, "a_extra": null, "b": 2, "b_extra": "expensive"}),
            json!({"a": null, "a_extra": null, "b": null, "b_extra": null}),
        ]
    );
    // nothing matched the last row
    assert_eq!(pulls.get(), 2);
}

#[test]
fn test_flatten_empty_and_absent_yield_nothing() {
    let source = Pipe::new(IterableSource::new(vec![
        json!({"items": ["a", "b", "c"]}),
        json!({"items": []}),
        json!({}),
    ]));
    let flatten = Flatten::new(&source.take_with("items", micdrop::OnFail::Ignore));

    let (out, stats) = run_all(&flatten.elements(), RunOptions::default()).unwrap();
    assert_eq!(out, vec![json!("a"), json!("b"), json!("c")]);
    assert_eq!(stats.rows, 3);
}

#[test]
fn test_collect_dict_assembles_once_per_row() {
    let (calls, seen) = counter();
    let source = numbers(vec![1, 2]);

    let dict = CollectDict::new();
    source.then(dict.put("x"));
    source.map(|v| json!(v.as_i64().unwrap_or_default() + 1)).then(dict.put("y"));

    let call = CollectCall::new(move |args, _| {
        seen.set(seen.get() + 1);
        Ok(args.into_iter().next().unwrap_or_default())
    });
    dict.pipe().then(call.put());

    let list = CollectList::new();
    call.pipe().then(list.put());
    call.pipe().then(list.put());
    dict.pipe().then(list.put());

    let out = collect(&list.pipe()).unwrap();
    let first = json!({"x": 1, "y": 2});
    let second = json!({"x": 2, "y": 3});
    assert_eq!(
        out,
        vec![
            json!([first.clone(), first.clone(), first]),
            json!([second.clone(), second.clone(), second]),
        ]
    );
    assert_eq!(calls.get(), 2);
}

#[test]
fn test_skipped_rows_leave_no_trace() {
    let source = Pipe::new(IterableSource::new(vec![
        json!({"name": "kept", "n": 1}),
        json!({"name": "dropped", "n": -1}),
        json!({"name": "also kept", "n": 2}),
    ]));
    let sink = Sink::new();
    source.take("name").then(sink.put("name"));
    source
        .take("n")
        .then(SkipIf::new(|v| v.as_i64().is_some_and(|n| n < 0)))
        .then(sink.put("n"));

    let (out, stats) = run_all(&sink.pipe(), RunOptions::default()).unwrap();
    assert_eq!(
        out,
        vec![
            json!({"name": "kept", "n": 1}),
            json!({"name": "also kept", "n": 2}),
        ]
    );
    assert_eq!(stats.skipped, 1);
}

#[test]
fn test_choose_scenario() {
    let source = Pipe::new(IterableSource::new(vec![json!({"v": 6}), json!({"v": 1}), json!({"v": 9})]));
    let choice = Choose::on(&source.take("v"));
    Pipe::new(StaticSource::new(json!("six"))).then(choice.equals(6));
    Pipe::new(StaticSource::new(json!("big"))).then(choice.check(|v| v.as_i64().is_some_and(|n| n > 6)));
    Pipe::new(StaticSource::new(json!("small"))).then(choice.fallback());

    assert_eq!(
        collect(&choice.pipe()).unwrap(),
        vec![json!("six"), json!("small"), json!("big")]
    );
}

#[test]
fn test_merge_dicts_scenario() {
    let source = Pipe::new(IterableSource::new(vec![json!({"left": {"a": 1}, "right": {"a": null}})]));
    let merge = MergeDicts::new(MergeRules::default());
    source.take("left").then(merge.put());
    source.take("right").then(merge.put());

    assert_eq!(collect(&merge.pipe()).unwrap(), vec![json!({"a": 1})]);
}
