use std::collections::HashSet;
use std::fmt::{Display, Write};

use anyhow::{Context, anyhow};
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;

use crate::core::{is_truthy, render, type_name};
use crate::engine::Process;
use crate::error::Flow;

const TRUE_WORDS: &[&str] = &["1", "true", "True", "TRUE", "yes", "Yes", "YES", "on", "On", "ON"];
const FALSE_WORDS: &[&str] = &["0", "false", "False", "FALSE", "no", "No", "NO", "off", "Off", "OFF"];

/// Reads booleans out of their usual spellings.
///
/// Numbers and booleans are matched by their JSON text, so `1` and `"1"`
/// are both true. `null` stays `null`, anything unrecognised is an error.
pub struct ParseBoolean {
    truthy: HashSet<String>,
    falsy: HashSet<String>,
}

impl ParseBoolean {
    pub fn new() -> Self {
        Self::with_words(TRUE_WORDS.iter().copied(), FALSE_WORDS.iter().copied())
    }

    pub fn with_words<T, F>(truthy: T, falsy: F) -> Self
    where
        T: IntoIterator,
        T::Item: Into<String>,
        F: IntoIterator,
        F::Item: Into<String>,
    {
        Self {
            truthy: truthy.into_iter().map(Into::into).collect(),
            falsy: falsy.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for ParseBoolean {
    fn default() -> Self {
        Self::new()
    }
}

impl Process for ParseBoolean {
    fn name(&self) -> String {
        "ParseBoolean".into()
    }

    fn process(&mut self, value: Value) -> Flow<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Bool(b) => Ok(Value::Bool(b)),
            value => {
                let word = render(&value);
                if self.truthy.contains(&word) {
                    Ok(Value::Bool(true))
                } else if self.falsy.contains(&word) {
                    Ok(Value::Bool(false))
                } else {
                    Err(anyhow!("unrecognized boolean {value}").into())
                }
            }
        }
    }
}

/// Spells booleans out by truthiness, `"Yes"`/`"No"` unless configured.
pub struct FormatBoolean {
    yes: Value,
    no: Value,
}

impl FormatBoolean {
    pub fn new(yes: impl Into<Value>, no: impl Into<Value>) -> Self {
        Self {
            yes: yes.into(),
            no: no.into(),
        }
    }
}

impl Default for FormatBoolean {
    fn default() -> Self {
        Self::new("Yes", "No")
    }
}

impl Process for FormatBoolean {
    fn name(&self) -> String {
        "FormatBoolean".into()
    }

    fn process(&mut self, value: Value) -> Flow<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            value if is_truthy(&value) => Ok(self.yes.clone()),
            _ => Ok(self.no.clone()),
        }
    }
}

const DATE: &str = "%Y-%m-%d";
const DATETIME: &str = "%Y-%m-%d %H:%M:%S";
/// Canonical encoding of parsed datetimes flowing between nodes.
const ISO_DATETIME: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// The "zero date" of a format: what `0000-00-00 00:00:00` looks like in it.
///
/// Obtained by formatting a date made only of twos and zeroing them, so it
/// follows the layout of any format without parsing it.
fn zero_date(format: &str) -> String {
    NaiveDate::from_ymd_opt(2000, 2, 2)
        .and_then(|date| date.and_hms_opt(2, 2, 2))
        .and_then(|twos| formatted(twos.format(format), format).ok())
        .map(|text| text.replace('2', "0"))
        .unwrap_or_default()
}

/// Renders a chrono format, which fails on invalid format strings.
fn formatted(value: impl Display, format: &str) -> anyhow::Result<String> {
    let mut out = String::new();
    write!(out, "{value}").map_err(|_| anyhow!("invalid format string {format:?}"))?;
    Ok(out)
}

fn input<'a>(node: &str, value: &'a Value) -> anyhow::Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| anyhow!("{node} expects a string, got {}", type_name(value)))
}

fn parse_datetime(text: &str, format: &str) -> anyhow::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, format)
        .with_context(|| format!("couldn't parse {text:?} as {format:?}"))
}

fn parse_date(text: &str, format: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(text, format)
        .with_context(|| format!("couldn't parse {text:?} as {format:?}"))
}

macro_rules! date_process {
    ($(#[$doc:meta])* $name:ident, $default:expr) => {
        $(#[$doc])*
        pub struct $name {
            format: String,
            zero_date: bool,
        }

        impl $name {
            pub fn new(format: impl Into<String>) -> Self {
                Self {
                    format: format.into(),
                    zero_date: false,
                }
            }

            /// Maps between `null` and the zero date of the format.
            pub fn zero_date(mut self) -> Self {
                self.zero_date = true;
                self
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new($default)
            }
        }
    };
}

date_process!(
    /// Parses a date string into ISO `YYYY-MM-DD`.
    ParseDate,
    DATE
);
date_process!(
    /// Formats an ISO date with a custom format.
    FormatDate,
    DATE
);
date_process!(
    /// Parses a datetime string into ISO `YYYY-MM-DDTHH:MM:SS`.
    ParseDatetime,
    DATETIME
);
date_process!(
    /// Formats an ISO datetime with a custom format.
    FormatDatetime,
    DATETIME
);

impl Process for ParseDate {
    fn name(&self) -> String {
        format!("ParseDate({:?})", self.format)
    }

    fn process(&mut self, value: Value) -> Flow<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let text = input("ParseDate", &value)?;
        if self.zero_date && text == zero_date(&self.format) {
            return Ok(Value::Null);
        }
        let date = parse_date(text, &self.format)?;
        Ok(Value::String(date.format(DATE).to_string()))
    }
}

impl Process for FormatDate {
    fn name(&self) -> String {
        format!("FormatDate({:?})", self.format)
    }

    fn process(&mut self, value: Value) -> Flow<Value> {
        if value.is_null() {
            return Ok(match self.zero_date {
                true => Value::String(zero_date(&self.format)),
                false => Value::Null,
            });
        }
        let date = parse_date(input("FormatDate", &value)?, DATE)?;
        Ok(Value::String(formatted(date.format(&self.format), &self.format)?))
    }
}

impl Process for ParseDatetime {
    fn name(&self) -> String {
        format!("ParseDatetime({:?})", self.format)
    }

    fn process(&mut self, value: Value) -> Flow<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let text = input("ParseDatetime", &value)?;
        if self.zero_date && text == zero_date(&self.format) {
            return Ok(Value::Null);
        }
        let datetime = parse_datetime(text, &self.format)?;
        Ok(Value::String(datetime.format(ISO_DATETIME).to_string()))
    }
}

impl Process for FormatDatetime {
    fn name(&self) -> String {
        format!("FormatDatetime({:?})", self.format)
    }

    fn process(&mut self, value: Value) -> Flow<Value> {
        if value.is_null() {
            return Ok(match self.zero_date {
                true => Value::String(zero_date(&self.format)),
                false => Value::Null,
            });
        }
        let datetime = parse_datetime(input("FormatDatetime", &value)?, ISO_DATETIME)?;
        Ok(Value::String(formatted(datetime.format(&self.format), &self.format)?))
    }
}

/// Rewrites a datetime string from one format to another.
pub struct ConvertDatetime {
    from: String,
    to: String,
    zero_in: bool,
    zero_out: bool,
}

impl ConvertDatetime {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            zero_in: false,
            zero_out: false,
        }
    }

    /// Reads the zero date of the input format as `null`.
    pub fn zero_date_in(mut self) -> Self {
        self.zero_in = true;
        self
    }

    /// Writes `null` as the zero date of the output format.
    pub fn zero_date_out(mut self) -> Self {
        self.zero_out = true;
        self
    }
}

impl Process for ConvertDatetime {
    fn name(&self) -> String {
        format!("ConvertDatetime({:?} -> {:?})", self.from, self.to)
    }

    fn process(&mut self, value: Value) -> Flow<Value> {
        let value = match value {
            Value::String(text) if self.zero_in && text == zero_date(&self.from) => Value::Null,
            value => value,
        };
        if value.is_null() {
            return Ok(match self.zero_out {
                true => Value::String(zero_date(&self.to)),
                false => Value::Null,
            });
        }
        let datetime = parse_datetime(input("ConvertDatetime", &value)?, &self.from)?;
        Ok(Value::String(formatted(datetime.format(&self.to), &self.to)?))
    }
}
