//! Row-level control flow: choosing between sub-pipelines, routing values to
//! one of several cases, and turning values or failures into skip/stop
//! signals.

mod branch;
mod choose;
mod control;
mod fail;

use serde_json::Value;

use crate::core::compare;

pub use branch::{Branch, BranchCase};
pub use choose::Choose;
pub use control::{SkipIf, SkipIfRepeat, SkipRow, StopIf, StopIfRepeat, StopProcessing};
pub use fail::FailGuard;

pub(crate) type Predicate = Box<dyn FnMut(&Value) -> bool>;

/// Predicate helpers shared by [`Choose`] and [`Branch`].
///
/// Each call registers one more alternative. Alternatives are tried in the
/// order they were registered and the first match wins.
pub trait Select {
    /// What a matching alternative is wired through.
    type Case;

    fn check<F>(&self, predicate: F) -> Self::Case
    where
        F: FnMut(&Value) -> bool + 'static;

    fn equals(&self, expected: impl Into<Value>) -> Self::Case {
        let expected = expected.into();
        self.check(move |value| loose_eq(value, &expected))
    }

    fn not_equals(&self, expected: impl Into<Value>) -> Self::Case {
        let expected = expected.into();
        self.check(move |value| !loose_eq(value, &expected))
    }

    fn is_in<I, V>(&self, candidates: I) -> Self::Case
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let candidates: Vec<Value> = candidates.into_iter().map(Into::into).collect();
        self.check(move |value| candidates.iter().any(|c| loose_eq(value, c)))
    }

    fn not_in<I, V>(&self, candidates: I) -> Self::Case
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let candidates: Vec<Value> = candidates.into_iter().map(Into::into).collect();
        self.check(move |value| !candidates.iter().any(|c| loose_eq(value, c)))
    }

    fn is_null(&self) -> Self::Case {
        self.check(Value::is_null)
    }

    fn is_not_null(&self) -> Self::Case {
        self.check(|value| !value.is_null())
    }

    /// Always matches, so it belongs last.
    fn fallback(&self) -> Self::Case {
        self.check(|_| true)
    }
}

/// Equality that treats `1` and `1.0` as the same number.
pub(crate) fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare(a, b).is_eq(),
        _ => a == b,
    }
}
