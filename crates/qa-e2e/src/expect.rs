//! Response expectations and poll predicates.

use qa_core::ApiResponse;
use serde_json::Value;
use uuid::Uuid;

use crate::template::{render_value, Vars};

/// One check against a response. Pointers are JSON pointers into the body.
#[derive(Debug, Clone, PartialEq)]
pub enum Expect {
    Status(u16),
    StatusIn(Vec<u16>),
    Present(String),
    /// Expected value may contain placeholders
    Equals(String, Value),
    OneOf(String, Vec<Value>),
    /// Substring for strings, element for arrays
    Contains(String, Value),
    /// Length of a string or array
    Len(String, usize),
    MinLen(String, usize),
    AtLeast(String, f64),
    GreaterThan(String, f64),
    IsUuid(String),
    /// Every element of the array has the listed keys
    EachHas(String, Vec<String>),
}

impl Expect {
    /// Short description used in assertion logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Status(code) => format!("status == {code}"),
            Self::StatusIn(codes) => format!("status in {codes:?}"),
            Self::Present(p) => format!("{p} present"),
            Self::Equals(p, v) => format!("{p} == {v}"),
            Self::OneOf(p, vs) => format!("{p} in {}", Value::Array(vs.clone())),
            Self::Contains(p, v) => format!("{p} contains {v}"),
            Self::Len(p, n) => format!("len({p}) == {n}"),
            Self::MinLen(p, n) => format!("len({p}) >= {n}"),
            Self::AtLeast(p, n) => format!("{p} >= {n}"),
            Self::GreaterThan(p, n) => format!("{p} > {n}"),
            Self::IsUuid(p) => format!("{p} is a UUID"),
            Self::EachHas(p, keys) => format!("every {p} item has {}", keys.join("/")),
        }
    }

    /// Check the response. The error names what was observed.
    pub fn check(&self, response: &ApiResponse, vars: &Vars) -> Result<(), String> {
        let field = |pointer: &str| field(response, pointer);

        match self {
            Self::Status(code) => ensure(response.status == *code, || format!("got status {}", response.status)),
            Self::StatusIn(codes) => {
                ensure(codes.contains(&response.status), || format!("got status {}", response.status))
            }
            Self::Present(p) => field(p).map(|_| ()),
            Self::Equals(p, expected) => {
                let expected = render_value(expected, vars).map_err(|name| format!("unknown variable `{name}`"))?;
                let actual = field(p)?;
                ensure(values_equal(actual, &expected), || format!("got {actual}"))
            }
            Self::OneOf(p, options) => {
                let actual = field(p)?;
                ensure(options.iter().any(|o| values_equal(actual, o)), || format!("got {actual}"))
            }
            Self::Contains(p, needle) => {
                let actual = field(p)?;
                let found = match (actual, needle) {
                    (Value::String(hay), Value::String(n)) => hay.contains(n.as_str()),
                    (Value::Array(items), n) => items.iter().any(|item| values_equal(item, n)),
                    _ => false,
                };
                ensure(found, || format!("got {actual}"))
            }
            Self::Len(p, n) => {
                let len = length(field(p)?).ok_or_else(|| format!("{p} has no length"))?;
                ensure(len == *n, || format!("got length {len}"))
            }
            Self::MinLen(p, n) => {
                let len = length(field(p)?).ok_or_else(|| format!("{p} has no length"))?;
                ensure(len >= *n, || format!("got length {len}"))
            }
            Self::AtLeast(p, n) => {
                let actual = number(field(p)?, p)?;
                ensure(actual >= *n, || format!("got {actual}"))
            }
            Self::GreaterThan(p, n) => {
                let actual = number(field(p)?, p)?;
                ensure(actual > *n, || format!("got {actual}"))
            }
            Self::IsUuid(p) => {
                let actual = field(p)?;
                let valid = actual
                    .as_str()
                    .map(|s| s.len() == 36 && Uuid::parse_str(s).is_ok())
                    .unwrap_or(false);
                ensure(valid, || format!("got {actual}"))
            }
            Self::EachHas(p, keys) => {
                let items = field(p)?
                    .as_array()
                    .ok_or_else(|| format!("{p} is not an array"))?;
                for (i, item) in items.iter().enumerate() {
                    if let Some(missing) = keys.iter().find(|k| item.get(k.as_str()).is_none()) {
                        return Err(format!("item {i} lacks `{missing}`"));
                    }
                }
                Ok(())
            }
        }
    }
}

fn field<'a>(response: &'a ApiResponse, pointer: &str) -> Result<&'a Value, String> {
    response
        .pointer(pointer)
        .ok_or_else(|| format!("{pointer} missing"))
}

fn ensure(condition: bool, observed: impl FnOnce() -> String) -> Result<(), String> {
    if condition {
        Ok(())
    } else {
        Err(observed())
    }
}

// Integers and floats compare numerically so `1` matches `1.0`.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

fn length(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        Value::Object(map) => Some(map.len()),
        _ => None,
    }
}

fn number(value: &Value, pointer: &str) -> Result<f64, String> {
    value
        .as_f64()
        .ok_or_else(|| format!("{pointer} is not a number: {value}"))
}

/// All expectations hold.
pub fn all_hold(expects: &[Expect], response: &ApiResponse, vars: &Vars) -> bool {
    expects.iter().all(|e| e.check(response, vars).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn response(status: u16, body: Value) -> ApiResponse {
        ApiResponse {
            status,
            body,
            latency: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_status_and_fields() {
        let r = response(201, json!({"id": "7c9e6679-7425-40de-944b-e07fc1f90ae7", "version": 1, "tags": ["qa", "e2e"]}));
        let vars = Vars::new();

        assert!(Expect::Status(201).check(&r, &vars).is_ok());
        assert_eq!(Expect::Status(200).check(&r, &vars), Err("got status 201".to_string()));
        assert!(Expect::IsUuid("/id".into()).check(&r, &vars).is_ok());
        assert!(Expect::Equals("/version".into(), json!(1.0)).check(&r, &vars).is_ok());
        assert!(Expect::Contains("/tags".into(), json!("e2e")).check(&r, &vars).is_ok());
        assert!(Expect::Len("/tags".into(), 2).check(&r, &vars).is_ok());
        assert_eq!(
            Expect::Present("/missing".into()).check(&r, &vars),
            Err("/missing missing".to_string())
        );
    }

    #[test]
    fn test_equals_renders_variables() {
        let r = response(200, json!({"poi_id": "abc"}));
        let vars = Vars::from([("poi_id".to_string(), "abc".to_string())]);
        assert!(Expect::Equals("/poi_id".into(), json!("{poi_id}")).check(&r, &vars).is_ok());
        assert!(Expect::Equals("/poi_id".into(), json!("{other}")).check(&r, &vars).is_err());
    }

    #[test]
    fn test_each_has() {
        let r = response(200, json!({"scenes": [{"title": "a", "n": 1}, {"title": "b"}]}));
        let vars = Vars::new();
        assert!(Expect::EachHas("/scenes".into(), vec!["title".into()]).check(&r, &vars).is_ok());
        assert_eq!(
            Expect::EachHas("/scenes".into(), vec!["n".into()]).check(&r, &vars),
            Err("item 1 lacks `n`".to_string())
        );
    }

    #[test]
    fn test_numeric_bounds() {
        let r = response(200, json!({"confidence": 0.0, "total": 3}));
        let vars = Vars::new();
        assert!(Expect::AtLeast("/total".into(), 1.0).check(&r, &vars).is_ok());
        assert!(Expect::GreaterThan("/confidence".into(), 0.0).check(&r, &vars).is_err());
        assert!(!all_hold(&[Expect::Status(200), Expect::MinLen("/total".into(), 1)], &r, &vars));
    }
}
