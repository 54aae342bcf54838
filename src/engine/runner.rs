mod diagnostics;

use std::time::Instant;

use indicatif::ProgressBar;
use serde::Deserialize;
use serde_json::Value;
use tracing::{Level, Span};

use crate::core::{NodeId, Token};
use crate::engine::{Pipe, Topology};
use crate::error::{Halt, RunError};

pub use diagnostics::{RunStats, StopReason};

/// Knobs for a single run of the driver loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// Stop after yielding this many rows.
    pub limit: Option<u64>,
    /// Draw a progress bar on stderr.
    pub progress: bool,
    /// Reject cyclic graphs before opening anything.
    pub validate: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            limit: None,
            progress: false,
            validate: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Pending,
    Running,
    Done,
}

/// The driver loop, as an iterator over the rows produced by a root node.
///
/// Every call to `next` issues fresh tokens to the root until a row comes
/// out. Skipped rows are swallowed, exhaustion and stop signals end the
/// iteration, and a hard error is yielded once before the iteration ends.
/// The graph is opened lazily on the first call and closed as soon as the
/// run is over, or when the iterator is dropped early.
pub struct Rows {
    root: Pipe,
    run: NodeId,
    options: RunOptions,
    state: State,
    stats: RunStats,
    started: Option<Instant>,
    bar: Option<ProgressBar>,
    span: Span,
    nested: bool,
}

impl Rows {
    pub fn new(root: &Pipe, options: RunOptions) -> Self {
        Self {
            root: root.clone(),
            run: NodeId::next(),
            options,
            state: State::Pending,
            stats: RunStats::default(),
            started: None,
            bar: None,
            span: tracing::span!(Level::INFO, "run", root = %root.name()),
            nested: false,
        }
    }

    /// A run driven from inside another run's row, logged at debug level.
    pub(crate) fn nested(root: &Pipe, options: RunOptions) -> Self {
        let mut rows = Self::new(root, options);
        rows.span = tracing::span!(Level::DEBUG, "run", root = %root.name());
        rows.nested = true;
        rows
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    fn start(&mut self) -> Result<(), RunError> {
        self.started = Some(Instant::now());
        self.state = State::Running;

        if self.options.validate {
            Topology::of(&self.root).validate()?;
        }

        if let Err(e) = self.root.open() {
            let _ = self.root.close();
            return Err(RunError::Open(e));
        }

        if self.options.progress {
            self.bar = Some(self.create_bar());
        }

        tracing::debug!("opened pipeline");
        Ok(())
    }

    fn create_bar(&self) -> ProgressBar {
        let progress = self.root.progress();
        let (bar, style) = match progress.total {
            Some(total) => (ProgressBar::new(total), crate::utils::get_style_rows()),
            None => (ProgressBar::new_spinner(), crate::utils::get_style_spinner()),
        };
        if let Ok(style) = style {
            bar.set_style(style);
        }
        bar
    }

    fn finish(&mut self, reason: StopReason) -> Option<RunError> {
        self.state = State::Done;
        self.stats.stop = Some(reason);
        if let Some(started) = self.started {
            self.stats.duration = started.elapsed();
        }
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }

        let closed = self.root.close();
        match self.nested {
            true => tracing::debug!("finished run: {}", self.stats),
            false => tracing::info!("finished run: {}", self.stats),
        }
        closed.err().map(RunError::Close)
    }

    fn tick(&mut self) -> Result<Value, Halt> {
        self.stats.ticks += 1;
        let token = Token::new(self.stats.ticks).scoped(self.run);
        self.root.advance(&token)?;
        self.root.get()
    }
}

impl Iterator for Rows {
    type Item = Result<Value, RunError>;

    fn next(&mut self) -> Option<Self::Item> {
        let span = self.span.clone();
        let _enter = span.enter();

        match self.state {
            State::Done => return None,
            State::Pending => {
                if let Err(e) = self.start() {
                    self.state = State::Done;
                    self.stats.stop = Some(StopReason::Failed);
                    return Some(Err(e));
                }
            }
            State::Running => {}
        }

        loop {
            if self
                .options
                .limit
                .is_some_and(|limit| self.stats.rows >= limit)
            {
                return self.finish(StopReason::Limit).map(Err);
            }

            match self.tick() {
                Ok(value) => {
                    self.stats.rows += 1;
                    if let Some(bar) = &self.bar {
                        match self.root.progress().completed {
                            Some(completed) => bar.set_position(completed),
                            None => bar.inc(1),
                        }
                    }
                    return Some(Ok(value));
                }
                Err(Halt::SkipRow) => {
                    self.stats.skipped += 1;
                    tracing::debug!(tick = self.stats.ticks, "skipped row");
                }
                Err(Halt::Exhausted) => return self.finish(StopReason::Exhausted).map(Err),
                Err(Halt::StopProcessing) => {
                    tracing::debug!(tick = self.stats.ticks, "processing stopped");
                    return self.finish(StopReason::Stopped).map(Err);
                }
                Err(Halt::Failed(source)) => {
                    let row = self.stats.ticks;
                    tracing::error!(row, "{source}");
                    if let Some(closed) = self.finish(StopReason::Failed) {
                        tracing::error!("{closed}");
                    }
                    return Some(Err(RunError::Row { row, source }));
                }
            }
        }
    }
}

impl Drop for Rows {
    fn drop(&mut self) {
        if self.state == State::Running {
            let _ = self.root.close();
        }
    }
}

/// Runs `root` with default options.
pub fn run(root: &Pipe) -> Rows {
    Rows::new(root, RunOptions::default())
}

/// Runs `root` to completion and collects every row.
pub fn run_all(root: &Pipe, options: RunOptions) -> Result<(Vec<Value>, RunStats), RunError> {
    let mut rows = Rows::new(root, options);
    let values = rows.by_ref().collect::<Result<Vec<_>, _>>()?;
    Ok((values, rows.stats().clone()))
}

/// Shorthand for [`run_all`] when only the rows matter.
pub fn collect(root: &Pipe) -> Result<Vec<Value>, RunError> {
    run(root).collect()
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use serde_json::json;

    use super::*;
    use crate::engine::{Node, Put};
    use crate::error::{Flow, NodeError};
    use crate::flow::SkipIf;
    use crate::source::IterableSource;

    #[test]
    fn test_run_yields_every_row() {
        let source = Pipe::new(IterableSource::new(vec![json!(1), json!(2), json!(3)]));
        let doubled = source.map(|v| json!(v.as_i64().unwrap_or_default() * 2));

        let (rows, stats) = run_all(&doubled, RunOptions::default()).unwrap();
        assert_eq!(rows, vec![json!(2), json!(4), json!(6)]);
        assert_eq!(stats.rows, 3);
        assert_eq!(stats.ticks, 4);
        assert_eq!(stats.stop, Some(StopReason::Exhausted));
        assert!(!source.is_open());
    }

    #[test]
    fn test_run_skips_rows() {
        let source = Pipe::new(IterableSource::new(vec![json!(1), json!(2), json!(3)]));
        let odd = source.then(SkipIf::new(|v| v.as_i64() == Some(2)));

        let (rows, stats) = run_all(&odd, RunOptions::default()).unwrap();
        assert_eq!(rows, vec![json!(1), json!(3)]);
        assert_eq!(stats.skipped, 1);
    }

    #[test]
    fn test_run_limit() {
        let source = Pipe::new(IterableSource::new((0..100).map(|i| json!(i))));
        let options = RunOptions {
            limit: Some(2),
            ..Default::default()
        };

        let (rows, stats) = run_all(&source, options).unwrap();
        assert_eq!(rows, vec![json!(0), json!(1)]);
        assert_eq!(stats.stop, Some(StopReason::Limit));
    }

    #[test]
    fn test_run_error_stops_and_closes() {
        let source = Pipe::new(IterableSource::new(vec![json!(1), json!(0), json!(2)]));
        let checked = source.try_map(|v| {
            if v == json!(0) {
                anyhow::bail!("zero");
            }
            Ok(v)
        });

        let mut rows = run(&checked);
        assert_eq!(rows.next().unwrap().unwrap(), json!(1));
        match rows.next() {
            Some(Err(RunError::Row { row, source })) => {
                assert_eq!(row, 2);
                assert!(matches!(source, NodeError::Located { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(rows.next().is_none());
        assert!(!source.is_open());
    }

    #[test]
    fn test_drop_closes_pipeline() {
        let source = Pipe::new(IterableSource::new(vec![json!(1), json!(2)]));
        let mut rows = run(&source);
        rows.next();
        assert!(source.is_open());
        drop(rows);
        assert!(!source.is_open());
    }

    #[test]
    fn test_rejects_cycles() {
        let a = Put::pipe();
        let b = Put::pipe();
        a.connect(&b).unwrap();
        b.connect(&a).unwrap();

        let result = collect(&a);
        assert!(matches!(result, Err(RunError::Build(_))));
    }

    struct FailingOpen(Rc<Cell<bool>>);

    impl Node for FailingOpen {
        fn name(&self) -> String {
            "FailingOpen".into()
        }

        fn get(&mut self) -> Flow<Value> {
            Ok(Value::Null)
        }

        fn open(&mut self) -> Result<(), NodeError> {
            Err(NodeError::Open(self.name(), anyhow::anyhow!("no connection")))
        }

        fn close(&mut self) -> Result<(), NodeError> {
            self.0.set(true);
            Ok(())
        }
    }

    #[test]
    fn test_open_failure_is_reported() {
        let closed = Rc::new(Cell::new(false));
        let failing = Pipe::new(FailingOpen(closed.clone()));
        let source = Pipe::new(IterableSource::new(vec![json!(1)]));
        let list = crate::collect::CollectList::new();
        source.then(list.put());
        failing.then(list.put());

        let result = collect(&list.pipe());
        assert!(matches!(result, Err(RunError::Open(_))));
        assert!(!source.is_open());
        assert!(closed.get());
    }

    #[test]
    fn test_options_deserialize() {
        let options: RunOptions = serde_json::from_str(r#"{"limit": 5}"#).unwrap();
        assert_eq!(options.limit, Some(5));
        assert!(options.validate);
        assert!(!options.progress);
    }

    struct FailingClose;

    impl Node for FailingClose {
        fn name(&self) -> String {
            "FailingClose".into()
        }

        fn get(&mut self) -> Flow<Value> {
            Err(anyhow::anyhow!("broken row").into())
        }

        fn close(&mut self) -> Result<(), NodeError> {
            Err(NodeError::Close(self.name(), anyhow::anyhow!("lost connection")))
        }
    }

    #[test]
    fn test_row_error_wins_over_close_error() {
        let source = Pipe::new(IterableSource::new(vec![json!(1), json!(2)]));
        let list = crate::collect::CollectList::new();
        source.then(list.put());
        Pipe::new(FailingClose).then(list.put());

        let mut rows = run(&list.pipe());
        assert!(matches!(rows.next(), Some(Err(RunError::Row { row: 1, .. }))));
        assert!(rows.next().is_none());
        assert_eq!(rows.stats().stop, Some(StopReason::Failed));
        assert!(!source.is_open());
    }

    #[test]
    fn test_nested_run_behaves_like_a_run() {
        let source = Pipe::new(IterableSource::new(vec![json!(1), json!(2), json!(3)]));
        let odd = source.then(SkipIf::new(|v| v.as_i64() == Some(2)));

        let mut rows = Rows::nested(&odd, RunOptions::default());
        let out = rows.by_ref().collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(out, vec![json!(1), json!(3)]);
        assert_eq!(rows.stats().skipped, 1);
        assert!(!source.is_open());
    }
}
