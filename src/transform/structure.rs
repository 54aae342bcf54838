use anyhow::{Context, anyhow};
use serde_json::{Map, Value};

use crate::core::{render, type_name};
use crate::engine::Process;
use crate::error::Flow;
use crate::transform::join;

fn text<'a>(node: &str, value: &'a Value) -> anyhow::Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| anyhow!("{node} expects a string, got {}", type_name(value)))
}

/// Splits a string into a list; `null` becomes an empty list.
pub struct SplitDelimited(String);

impl SplitDelimited {
    pub fn new(delimiter: impl Into<String>) -> Self {
        Self(delimiter.into())
    }
}

impl Process for SplitDelimited {
    fn name(&self) -> String {
        format!("SplitDelimited({:?})", self.0)
    }

    fn process(&mut self, value: Value) -> Flow<Value> {
        if value.is_null() {
            return Ok(Value::Array(Vec::new()));
        }
        let text = text("SplitDelimited", &value)?;
        Ok(Value::Array(
            text.split(self.0.as_str()).map(Value::from).collect(),
        ))
    }
}

/// Joins a list into a string, leaving out `null` elements.
pub struct JoinDelimited(String);

impl JoinDelimited {
    pub fn new(delimiter: impl Into<String>) -> Self {
        Self(delimiter.into())
    }
}

impl Process for JoinDelimited {
    fn name(&self) -> String {
        format!("JoinDelimited({:?})", self.0)
    }

    fn process(&mut self, value: Value) -> Flow<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Array(items) => Ok(Value::String(join(items, &self.0))),
            other => Err(anyhow!("JoinDelimited expects an array, got {}", type_name(&other)).into()),
        }
    }
}

/// Splits `key=value` lines into an object; `null` becomes an empty object.
pub struct SplitKeyValue {
    pair: String,
    row: String,
}

impl SplitKeyValue {
    /// Pairs separated by newlines.
    pub fn new(pair: impl Into<String>) -> Self {
        Self::with_rows(pair, "\n")
    }

    pub fn with_rows(pair: impl Into<String>, row: impl Into<String>) -> Self {
        Self {
            pair: pair.into(),
            row: row.into(),
        }
    }
}

impl Process for SplitKeyValue {
    fn name(&self) -> String {
        format!("SplitKeyValue({:?})", self.pair)
    }

    fn process(&mut self, value: Value) -> Flow<Value> {
        if value.is_null() {
            return Ok(Value::Object(Map::new()));
        }
        let text = text("SplitKeyValue", &value)?;
        let rows: Vec<&str> = match self.row.as_str() {
            "\n" => text.lines().collect(),
            row => text.split(row).collect(),
        };

        let mut map = Map::new();
        for row in rows.into_iter().filter(|row| !row.is_empty()) {
            let (key, value) = row
                .split_once(self.pair.as_str())
                .with_context(|| format!("no {:?} in {row:?}", self.pair))?;
            map.insert(key.to_string(), Value::from(value));
        }
        Ok(Value::Object(map))
    }
}

/// Joins an object into `key=value` lines, leaving out `null` values.
pub struct JoinKeyValue {
    pair: String,
    row: String,
}

impl JoinKeyValue {
    pub fn new(pair: impl Into<String>) -> Self {
        Self::with_rows(pair, "\n")
    }

    pub fn with_rows(pair: impl Into<String>, row: impl Into<String>) -> Self {
        Self {
            pair: pair.into(),
            row: row.into(),
        }
    }
}

impl Process for JoinKeyValue {
    fn name(&self) -> String {
        format!("JoinKeyValue({:?})", self.pair)
    }

    fn process(&mut self, value: Value) -> Flow<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Object(map) => Ok(Value::String(
                map.iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, v)| format!("{k}{}{}", self.pair, render(v)))
                    .collect::<Vec<_>>()
                    .join(&self.row),
            )),
            other => Err(anyhow!("JoinKeyValue expects an object, got {}", type_name(&other)).into()),
        }
    }
}

/// Parses a JSON document held in a string.
pub struct JsonParse;

impl Process for JsonParse {
    fn name(&self) -> String {
        "JsonParse".into()
    }

    fn process(&mut self, value: Value) -> Flow<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let text = text("JsonParse", &value)?;
        Ok(serde_json::from_str(text).context("invalid JSON")?)
    }
}

/// Encodes the value as a JSON string.
pub struct JsonFormat {
    pretty: bool,
}

impl JsonFormat {
    pub fn new() -> Self {
        Self { pretty: false }
    }

    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl Default for JsonFormat {
    fn default() -> Self {
        Self::new()
    }
}

impl Process for JsonFormat {
    fn name(&self) -> String {
        "JsonFormat".into()
    }

    fn process(&mut self, value: Value) -> Flow<Value> {
        let text = match self.pretty {
            true => serde_json::to_string_pretty(&value),
            false => serde_json::to_string(&value),
        };
        Ok(Value::String(text.context("couldn't encode value")?))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_delimited() {
        let mut split = SplitDelimited::new(",");
        assert_eq!(split.process(json!("a,b,,c")).unwrap(), json!(["a", "b", "", "c"]));
        assert_eq!(split.process(Value::Null).unwrap(), json!([]));
        assert!(split.process(json!(1)).is_err());

        let mut join = JoinDelimited::new("; ");
        assert_eq!(join.process(json!(["a", null, 2])).unwrap(), json!("a; 2"));
        assert_eq!(join.process(Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn test_key_value() {
        let mut split = SplitKeyValue::new("=");
        assert_eq!(
            split.process(json!("a=1\nb=x=y\n")).unwrap(),
            json!({"a": "1", "b": "x=y"})
        );
        assert!(split.process(json!("novalue")).is_err());

        let mut split = SplitKeyValue::with_rows(":", ";");
        assert_eq!(split.process(json!("k:v;l:w")).unwrap(), json!({"k": "v", "l": "w"}));

        let mut join = JoinKeyValue::with_rows("=", "&");
        assert_eq!(
            join.process(json!({"a": 1, "b": null, "c": "x"})).unwrap(),
            json!("a=1&c=x")
        );
    }

    #[test]
    fn test_json() {
        let mut parse = JsonParse;
        assert_eq!(parse.process(json!("{\"a\": [1]}")).unwrap(), json!({"a": [1]}));
        assert!(parse.process(json!("{")).is_err());

        let mut format = JsonFormat::new();
        assert_eq!(format.process(json!({"a": [1]})).unwrap(), json!("{\"a\":[1]}"));
    }
}
