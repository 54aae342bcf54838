use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The origin ran out of rows.
    Exhausted,
    /// A node requested graceful termination.
    Stopped,
    /// The configured row limit was reached.
    Limit,
    /// A row failed with a hard error.
    Failed,
}

/// Run diagnostics.
///
/// Returned by [`Rows::stats`](crate::engine::Rows::stats) and logged once a run is
/// over.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    /// Number of tokens issued to the root.
    pub ticks: u64,
    /// Rows yielded to the caller.
    pub rows: u64,
    /// Rows abandoned with a skip signal.
    pub skipped: u64,
    pub stop: Option<StopReason>,
    pub duration: Duration,
}

impl Display for RunStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} rows, {} skipped in {:.2?}",
            self.rows, self.skipped, self.duration
        )?;
        if let Some(stop) = self.stop {
            write!(f, " ({stop:?})")?;
        }
        Ok(())
    }
}
