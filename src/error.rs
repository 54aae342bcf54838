use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Anything that interrupts the evaluation of a row.
///
/// Only [`Halt::Failed`] is an error in the usual sense. The other variants
/// are control signals: they pass through intermediate nodes untouched, are
/// never cached, and are interpreted by the driver loop (and by the few nodes
/// that own a loop of their own, like flatten or filtered sources).
#[derive(Debug, Error)]
pub enum Halt {
    /// The origin has no more rows. Ends the driver loop cleanly.
    #[error("source exhausted")]
    Exhausted,

    /// The current row is abandoned, the loop continues with a fresh token.
    #[error("row skipped")]
    SkipRow,

    /// Graceful termination of all processing.
    #[error("processing stopped")]
    StopProcessing,

    #[error(transparent)]
    Failed(#[from] NodeError),
}

impl Halt {
    pub fn is_control(&self) -> bool {
        !matches!(self, Halt::Failed(_))
    }
}

impl From<anyhow::Error> for Halt {
    fn from(e: anyhow::Error) -> Self {
        Halt::Failed(NodeError::Raised(e))
    }
}

/// Result of every row-level operation in the graph.
pub type Flow<T> = Result<T, Halt>;

#[derive(Debug, Error)]
pub enum NodeError {
    /// An error raised inside a node, not yet tagged with its location.
    #[error(transparent)]
    Raised(#[from] anyhow::Error),

    #[error("Error in pipeline `{chain}` with value `{value}`:\n{source}")]
    Located {
        chain: String,
        value: String,
        source: anyhow::Error,
    },

    #[error("Key {0} not found")]
    MissingKey(String),

    #[error("Node '{0}' has no upstream attached")]
    Detached(String),

    #[error("Couldn't open node '{0}':\n{1}")]
    Open(String, anyhow::Error),

    #[error("Couldn't close node '{0}':\n{1}")]
    Close(String, anyhow::Error),
}

/// Errors raised while wiring nodes together.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Node '{0}' doesn't accept an upstream")]
    NoInlet(String),

    #[error("Node '{0}' already has an upstream attached")]
    AlreadyAttached(String),

    #[error("Cycle detected in pipeline at node '{0}'")]
    Cycle(String),

    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),
}

/// Errors that end a run of the driver loop.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Error while validating the pipeline.\n{0}")]
    Build(#[from] BuildError),

    #[error("Error while opening the pipeline.\n{0}")]
    Open(NodeError),

    #[error("Error while processing row {row}.\n{source}")]
    Row { row: u64, source: NodeError },

    #[error("Error while closing the pipeline.\n{0}")]
    Close(NodeError),
}

/// Policy applied when a lookup inside a node fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFail {
    /// Propagate the error as a hard failure.
    #[default]
    Fail,
    /// Stop all processing.
    Stop,
    /// Skip the current row.
    Skip,
    /// Substitute `null` and carry on.
    Ignore,
    LogAndSkip,
    LogAndIgnore,
}

impl OnFail {
    /// Turns a failure into the outcome this policy prescribes.
    ///
    /// Control signals are never swallowed, they always propagate as is.
    pub fn handle(self, halt: Halt) -> Flow<Value> {
        let error = match halt {
            Halt::Failed(error) => error,
            signal => return Err(signal),
        };

        match self {
            OnFail::Fail => Err(Halt::Failed(error)),
            OnFail::Stop => Err(Halt::StopProcessing),
            OnFail::Skip => Err(Halt::SkipRow),
            OnFail::Ignore => Ok(Value::Null),
            OnFail::LogAndSkip => {
                tracing::error!("{error}, skipping row");
                Err(Halt::SkipRow)
            }
            OnFail::LogAndIgnore => {
                tracing::error!("{error}, ignoring");
                Ok(Value::Null)
            }
        }
    }

    pub(crate) fn missing(self, key: impl std::fmt::Display) -> Flow<Value> {
        self.handle(NodeError::MissingKey(key.to_string()).into())
    }
}
