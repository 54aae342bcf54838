use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use anyhow::{anyhow, bail};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Number, Value};

use crate::collect::{Assemble, Collect};
use crate::core::{compare, is_truthy, render, type_name};
use crate::engine::Pipe;
use crate::error::Flow;

type Resolver = Rc<dyn Fn(&[Value]) -> anyhow::Result<Value>>;

/// Resolves the values several dicts hold for the same key into one.
#[derive(Clone)]
pub enum OnConflict {
    First,
    Last,
    FirstNonNull,
    LastNonNull,
    FirstTruthy,
    LastTruthy,
    LeastNonNull,
    GreatestNonNull,
    /// Integer sum when every value is an integer, float sum otherwise.
    Sum,
    Concatenate(String),
    /// The first value is the original, the first variant differing from it
    /// wins.
    NWayFirst,
    /// Like [`OnConflict::NWayFirst`], searching variants from the end.
    NWayLast,
    Custom(Resolver),
}

impl OnConflict {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> anyhow::Result<Value> + 'static,
    {
        OnConflict::Custom(Rc::new(f))
    }

    pub fn resolve(&self, values: &[Value]) -> anyhow::Result<Value> {
        let non_null = || values.iter().filter(|v| !v.is_null());

        let value = match self {
            OnConflict::First => values.first().cloned(),
            OnConflict::Last => values.last().cloned(),
            OnConflict::FirstNonNull => non_null().next().cloned(),
            OnConflict::LastNonNull => non_null().last().cloned(),
            OnConflict::FirstTruthy => values.iter().find(|v| is_truthy(v)).cloned(),
            OnConflict::LastTruthy => values.iter().rev().find(|v| is_truthy(v)).cloned(),
            OnConflict::LeastNonNull => non_null().min_by(|a, b| compare(a, b)).cloned(),
            OnConflict::GreatestNonNull => non_null().max_by(|a, b| compare(a, b)).cloned(),
            OnConflict::Sum => Some(sum(non_null())?),
            OnConflict::Concatenate(delimiter) => Some(Value::String(
                non_null().map(render).collect::<Vec<_>>().join(delimiter),
            )),
            OnConflict::NWayFirst => values.split_first().map(|(original, variants)| {
                variants
                    .iter()
                    .find(|v| *v != original)
                    .unwrap_or(original)
                    .clone()
            }),
            OnConflict::NWayLast => values.split_first().map(|(original, variants)| {
                variants
                    .iter()
                    .rev()
                    .find(|v| *v != original)
                    .unwrap_or(original)
                    .clone()
            }),
            OnConflict::Custom(f) => Some(f(values)?),
        };

        Ok(value.unwrap_or(Value::Null))
    }
}

fn sum<'a>(values: impl Iterator<Item = &'a Value>) -> anyhow::Result<Value> {
    let mut int: Option<i64> = Some(0);
    let mut float = 0.0;

    for value in values {
        let Value::Number(n) = value else {
            bail!("cannot sum {}", type_name(value));
        };
        int = match (int, n.as_i64()) {
            (Some(acc), Some(n)) => acc.checked_add(n),
            _ => None,
        };
        float += n.as_f64().unwrap_or_default();
    }

    match int {
        Some(int) => Ok(Value::Number(int.into())),
        None => Number::from_f64(float)
            .map(Value::Number)
            .ok_or_else(|| anyhow!("sum is not a finite number")),
    }
}

impl fmt::Debug for OnConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OnConflict::First => f.write_str("First"),
            OnConflict::Last => f.write_str("Last"),
            OnConflict::FirstNonNull => f.write_str("FirstNonNull"),
            OnConflict::LastNonNull => f.write_str("LastNonNull"),
            OnConflict::FirstTruthy => f.write_str("FirstTruthy"),
            OnConflict::LastTruthy => f.write_str("LastTruthy"),
            OnConflict::LeastNonNull => f.write_str("LeastNonNull"),
            OnConflict::GreatestNonNull => f.write_str("GreatestNonNull"),
            OnConflict::Sum => f.write_str("Sum"),
            OnConflict::Concatenate(d) => write!(f, "Concatenate({d:?})"),
            OnConflict::NWayFirst => f.write_str("NWayFirst"),
            OnConflict::NWayLast => f.write_str("NWayLast"),
            OnConflict::Custom(_) => f.write_str("Custom"),
        }
    }
}

impl FromStr for OnConflict {
    type Err = anyhow::Error;

    /// Parses snake_case names; `concatenate:<delimiter>` sets a delimiter.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(delimiter) = s.strip_prefix("concatenate:") {
            return Ok(OnConflict::Concatenate(delimiter.to_string()));
        }

        Ok(match s {
            "first" => OnConflict::First,
            "last" => OnConflict::Last,
            "first_non_null" => OnConflict::FirstNonNull,
            "last_non_null" => OnConflict::LastNonNull,
            "first_truthy" => OnConflict::FirstTruthy,
            "last_truthy" => OnConflict::LastTruthy,
            "least_non_null" => OnConflict::LeastNonNull,
            "greatest_non_null" => OnConflict::GreatestNonNull,
            "sum" => OnConflict::Sum,
            "concatenate" => OnConflict::Concatenate(String::new()),
            "n_way_first" => OnConflict::NWayFirst,
            "n_way_last" => OnConflict::NWayLast,
            other => bail!("unknown conflict resolver {other:?}"),
        })
    }
}

impl<'de> Deserialize<'de> for OnConflict {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

type SortKey = Rc<dyn Fn(&Value) -> Value>;

/// How [`MergeDicts`] combines its inputs.
#[derive(Clone)]
pub struct MergeRules {
    sort_key: Option<SortKey>,
    sort_reversed: bool,
    default: OnConflict,
    resolvers: HashMap<String, OnConflict>,
    keys: Option<Vec<String>>,
}

impl Default for MergeRules {
    fn default() -> Self {
        Self {
            sort_key: None,
            sort_reversed: false,
            default: OnConflict::FirstNonNull,
            resolvers: HashMap::new(),
            keys: None,
        }
    }
}

impl MergeRules {
    /// Orders the input dicts by `key` before resolving conflicts.
    pub fn sort_by<F>(mut self, key: F) -> Self
    where
        F: Fn(&Value) -> Value + 'static,
    {
        self.sort_key = Some(Rc::new(key));
        self
    }

    pub fn reversed(mut self) -> Self {
        self.sort_reversed = true;
        self
    }

    pub fn default_resolver(mut self, resolver: OnConflict) -> Self {
        self.default = resolver;
        self
    }

    pub fn resolver(mut self, key: impl Into<String>, resolver: OnConflict) -> Self {
        self.resolvers.insert(key.into(), resolver);
        self
    }

    /// Restricts the output to these keys, in this order.
    pub fn keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn merge(&self, dicts: Vec<Value>) -> anyhow::Result<Value> {
        let mut dicts = dicts
            .into_iter()
            .filter(|dict| !dict.is_null())
            .map(|dict| match dict {
                Value::Object(map) => Ok(map),
                other => Err(anyhow!("cannot merge {}", type_name(&other))),
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        if let Some(sort_key) = &self.sort_key {
            let mut keyed: Vec<_> = dicts
                .into_iter()
                .map(|dict| (sort_key(&Value::Object(dict.clone())), dict))
                .collect();
            // stable in both directions, ties keep their input order
            match self.sort_reversed {
                true => keyed.sort_by(|(a, _), (b, _)| compare(b, a)),
                false => keyed.sort_by(|(a, _), (b, _)| compare(a, b)),
            }
            dicts = keyed.into_iter().map(|(_, dict)| dict).collect();
        }

        let keys = match &self.keys {
            Some(keys) => keys.clone(),
            None => {
                let mut keys: Vec<String> = Vec::new();
                for dict in &dicts {
                    for key in dict.keys() {
                        if !keys.contains(key) {
                            keys.push(key.clone());
                        }
                    }
                }
                keys
            }
        };

        let mut merged = Map::new();
        for key in keys {
            let values: Vec<Value> = dicts.iter().filter_map(|d| d.get(&key).cloned()).collect();
            let value = match values.as_slice() {
                [single] => single.clone(),
                _ => self
                    .resolvers
                    .get(&key)
                    .unwrap_or(&self.default)
                    .resolve(&values)?,
            };
            merged.insert(key, value);
        }

        Ok(Value::Object(merged))
    }
}

impl Assemble for MergeRules {
    fn name(&self) -> String {
        "MergeDicts".into()
    }

    fn assemble(&mut self, args: &[Pipe], _: &[(String, Pipe)]) -> Flow<Value> {
        let dicts = args.iter().map(Pipe::get).collect::<Flow<Vec<_>>>()?;
        Ok(self.merge(dicts)?)
    }

    fn keys(&self, _: &[(String, Pipe)]) -> Option<BTreeSet<String>> {
        self.keys.as_ref().map(|keys| keys.iter().cloned().collect())
    }
}

/// Merges several dict-valued inputs key by key.
pub type MergeDicts = Collect<MergeRules>;

impl Collect<MergeRules> {
    pub fn new(rules: MergeRules) -> Self {
        Self::with(rules)
    }

    pub fn of<'a>(pipes: impl IntoIterator<Item = &'a Pipe>, rules: MergeRules) -> Self {
        let merge = Self::new(rules);
        for pipe in pipes {
            merge.add(pipe);
        }
        merge
    }

    pub fn put(&self) -> Pipe {
        self.put_positional()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::engine::collect;
    use crate::source::IterableSource;

    fn resolve(rule: OnConflict, values: Value) -> Value {
        let Value::Array(values) = values else {
            unreachable!()
        };
        rule.resolve(&values).unwrap()
    }

    #[test]
    fn test_resolvers() {
        let values = json!([null, 3, 0, 1, null]);
        assert_eq!(resolve(OnConflict::First, values.clone()), json!(null));
        assert_eq!(resolve(OnConflict::Last, values.clone()), json!(null));
        assert_eq!(resolve(OnConflict::FirstNonNull, values.clone()), json!(3));
        assert_eq!(resolve(OnConflict::LastNonNull, values.clone()), json!(1));
        assert_eq!(resolve(OnConflict::FirstTruthy, values.clone()), json!(3));
        assert_eq!(resolve(OnConflict::LastTruthy, values.clone()), json!(1));
        assert_eq!(resolve(OnConflict::LeastNonNull, values.clone()), json!(0));
        assert_eq!(resolve(OnConflict::GreatestNonNull, values.clone()), json!(3));
        assert_eq!(resolve(OnConflict::Sum, values), json!(4));
        assert_eq!(resolve(OnConflict::Sum, json!([1, 0.5])), json!(1.5));
        assert_eq!(resolve(OnConflict::Sum, json!([])), json!(0));
        assert_eq!(
            resolve(OnConflict::Concatenate(", ".into()), json!(["a", null, "b"])),
            json!("a, b")
        );
        assert_eq!(resolve(OnConflict::NWayFirst, json!([1, 1, 2, 3])), json!(2));
        assert_eq!(resolve(OnConflict::NWayLast, json!([1, 2, 3, 1])), json!(3));
        assert_eq!(resolve(OnConflict::NWayFirst, json!([1, 1])), json!(1));
        assert_eq!(resolve(OnConflict::First, json!([])), json!(null));
        assert!(OnConflict::Sum.resolve(&[json!("a")]).is_err());
    }

    #[test]
    fn test_resolver_names() {
        let rule: OnConflict = serde_json::from_str("\"greatest_non_null\"").unwrap();
        assert!(matches!(rule, OnConflict::GreatestNonNull));
        let rule: OnConflict = "concatenate:;".parse().unwrap();
        assert!(matches!(rule, OnConflict::Concatenate(d) if d == ";"));
        assert!("nope".parse::<OnConflict>().is_err());
    }

    #[test]
    fn test_merge_first_non_null() {
        let merged = MergeRules::default()
            .merge(vec![json!({"a": 1}), json!({"a": null})])
            .unwrap();
        assert_eq!(merged, json!({"a": 1}));
    }

    #[test]
    fn test_merge_single_owner_skips_resolver() {
        let rules = MergeRules::default().default_resolver(OnConflict::custom(|_| {
            anyhow::bail!("resolver must not run")
        }));
        let merged = rules
            .merge(vec![json!({"a": 1}), json!({"b": 2})])
            .unwrap();
        assert_eq!(merged, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn test_merge_sorted_with_preset_keys() {
        let rules = MergeRules::default()
            .sort_by(|d| d["ts"].clone())
            .reversed()
            .default_resolver(OnConflict::First)
            .resolver("n", OnConflict::Sum)
            .keys(["v", "n", "missing"]);

        let merged = rules
            .merge(vec![
                json!({"ts": 1, "v": "old", "n": 1, "extra": true}),
                json!({"ts": 2, "v": "new", "n": 2}),
            ])
            .unwrap();
        assert_eq!(merged, json!({"v": "new", "n": 3, "missing": null}));
    }

    #[test]
    fn test_merge_reversed_keeps_ties_in_order() {
        let rules = MergeRules::default()
            .sort_by(|d| d["ts"].clone())
            .reversed()
            .default_resolver(OnConflict::First);

        let merged = rules
            .merge(vec![
                json!({"ts": 1, "v": "a"}),
                json!({"ts": 1, "v": "b"}),
                json!({"ts": 0, "v": "c"}),
            ])
            .unwrap();
        assert_eq!(merged, json!({"ts": 1, "v": "a"}));
    }

    #[test]
    fn test_merge_dicts_node() {
        let source = Pipe::new(IterableSource::new(vec![
            json!({"left": {"a": 1}, "right": {"a": null}}),
            json!({"left": {"a": null, "b": 1}, "right": {"a": 2}}),
        ]));
        let merge = MergeDicts::of(
            [&source.take("left"), &source.take("right")],
            MergeRules::default(),
        );

        let out = collect(&merge.pipe()).unwrap();
        assert_eq!(out, vec![json!({"a": 1}), json!({"a": 2, "b": 1})]);
    }
}
