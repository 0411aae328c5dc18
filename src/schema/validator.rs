// Written by the IQRF Gateway developers
// (C)Copyright IQRF Tech s.r.o.
// https://iqrf.org

//! Structural JSON Schema validation
//!
//! Covers the keywords the daemon and scheduler schemas use: `$ref` (local
//! pointers), `type`, `enum`, `const`, `required`, `properties`,
//! `additionalProperties`, `items`, array and string length bounds, numeric
//! bounds and the `allOf`/`anyOf`/`oneOf`/`not` combinators. `pattern` and
//! `format` are accepted but not checked.

use serde::Serialize;
use serde_json::{Map, Value};

/// One failed constraint: where in the document, and what went wrong
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub pointer: String,
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let pointer = if self.pointer.is_empty() { "/" } else { &self.pointer };
        write!(f, "{}: {}", pointer, self.message)
    }
}

const MAX_REF_DEPTH: usize = 64;

/// Validates `document` against `schema`, using `schema` as the root for `$ref`.
pub fn validate(schema: &Value, document: &Value) -> Vec<Violation> {
    let mut walker = Walker { root: schema, violations: Vec::new(), depth: 0 };
    walker.check(schema, document, "");
    walker.violations
}

fn escape(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "null" => value.is_null(),
        "boolean" => value.is_boolean(),
        "string" => value.is_string(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "number" => value.is_number(),
        "integer" => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => true,
            Value::Number(n) => n.as_f64().is_some_and(|f| f.fract() == 0.0),
            _ => false,
        },
        _ => true,
    }
}

struct Walker<'a> {
    root: &'a Value,
    violations: Vec<Violation>,
    depth: usize,
}

impl<'a> Walker<'a> {
    fn fail(&mut self, pointer: &str, message: impl Into<String>) {
        self.violations.push(Violation { pointer: pointer.to_string(), message: message.into() });
    }

    /// Runs `schema` against `value` in isolation and reports whether it passed
    fn passes(&mut self, schema: &'a Value, value: &Value, pointer: &str) -> bool {
        let saved = std::mem::take(&mut self.violations);
        self.check(schema, value, pointer);
        let ok = self.violations.is_empty();
        self.violations = saved;
        ok
    }

    fn resolve(&self, reference: &str) -> Option<&'a Value> {
        let fragment = reference.strip_prefix('#')?;
        if fragment.is_empty() {
            return Some(self.root);
        }
        self.root.pointer(fragment)
    }

    fn check(&mut self, schema: &'a Value, value: &Value, pointer: &str) {
        let rules = match schema {
            Value::Bool(true) => return,
            Value::Bool(false) => {
                self.fail(pointer, "no value is allowed here");
                return;
            }
            Value::Object(rules) => rules,
            _ => return,
        };

        if let Some(Value::String(reference)) = rules.get("$ref") {
            match self.resolve(reference) {
                Some(target) if self.depth < MAX_REF_DEPTH => {
                    self.depth += 1;
                    self.check(target, value, pointer);
                    self.depth -= 1;
                }
                Some(_) => self.fail(pointer, format!("reference {} nests too deeply", reference)),
                None => self.fail(pointer, format!("unresolvable reference {}", reference)),
            }
        }

        self.check_type(rules, value, pointer);
        self.check_literals(rules, value, pointer);
        self.check_combinators(rules, value, pointer);

        match value {
            Value::Object(object) => self.check_object(rules, object, pointer),
            Value::Array(items) => self.check_array(rules, items, pointer),
            Value::String(s) => self.check_string(rules, s, pointer),
            Value::Number(n) => {
                if let Some(n) = n.as_f64() {
                    self.check_number(rules, n, pointer);
                }
            }
            _ => {}
        }
    }

    fn check_type(&mut self, rules: &Map<String, Value>, value: &Value, pointer: &str) {
        let allowed: Vec<&str> = match rules.get("type") {
            Some(Value::String(t)) => vec![t.as_str()],
            Some(Value::Array(list)) => list.iter().filter_map(Value::as_str).collect(),
            _ => return,
        };
        if !allowed.iter().any(|t| matches_type(t, value)) {
            self.fail(
                pointer,
                format!("expected {}, found {}", allowed.join(" or "), type_name(value)),
            );
        }
    }

    fn check_literals(&mut self, rules: &Map<String, Value>, value: &Value, pointer: &str) {
        if let Some(Value::Array(options)) = rules.get("enum") {
            if !options.iter().any(|option| option == value) {
                self.fail(pointer, format!("{} is not one of {}", value, Value::Array(options.clone())));
            }
        }
        if let Some(expected) = rules.get("const") {
            if expected != value {
                self.fail(pointer, format!("expected constant {}", expected));
            }
        }
    }

    fn check_combinators(&mut self, rules: &'a Map<String, Value>, value: &Value, pointer: &str) {
        if let Some(Value::Array(all)) = rules.get("allOf") {
            for sub in all {
                self.check(sub, value, pointer);
            }
        }
        if let Some(Value::Array(any)) = rules.get("anyOf") {
            if !any.iter().any(|sub| self.passes(sub, value, pointer)) {
                self.fail(pointer, "does not match any of the allowed schemas");
            }
        }
        if let Some(Value::Array(one)) = rules.get("oneOf") {
            let matched = one.iter().filter(|sub| self.passes(*sub, value, pointer)).count();
            if matched != 1 {
                self.fail(pointer, format!("must match exactly one schema, matched {}", matched));
            }
        }
        if let Some(not) = rules.get("not") {
            if self.passes(not, value, pointer) {
                self.fail(pointer, "matches a schema it must not match");
            }
        }
    }

    fn check_object(&mut self, rules: &'a Map<String, Value>, object: &Map<String, Value>, pointer: &str) {
        if let Some(Value::Array(required)) = rules.get("required") {
            for name in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(name) {
                    self.fail(pointer, format!("missing required property '{}'", name));
                }
            }
        }
        let properties = rules.get("properties").and_then(Value::as_object);
        let additional = rules.get("additionalProperties");
        for (name, child) in object {
            let child_pointer = format!("{}/{}", pointer, escape(name));
            match properties.and_then(|p| p.get(name)) {
                Some(sub) => self.check(sub, child, &child_pointer),
                None => match additional {
                    Some(Value::Bool(false)) => {
                        self.fail(&child_pointer, format!("property '{}' is not allowed", name));
                    }
                    Some(sub @ Value::Object(_)) => self.check(sub, child, &child_pointer),
                    _ => {}
                },
            }
        }
    }

    fn check_array(&mut self, rules: &'a Map<String, Value>, items: &[Value], pointer: &str) {
        if let Some(min) = rules.get("minItems").and_then(Value::as_u64) {
            if (items.len() as u64) < min {
                self.fail(pointer, format!("expected at least {} items, found {}", min, items.len()));
            }
        }
        if let Some(max) = rules.get("maxItems").and_then(Value::as_u64) {
            if (items.len() as u64) > max {
                self.fail(pointer, format!("expected at most {} items, found {}", max, items.len()));
            }
        }
        match rules.get("items") {
            Some(Value::Array(tuple)) => {
                for (index, (sub, item)) in tuple.iter().zip(items).enumerate() {
                    self.check(sub, item, &format!("{}/{}", pointer, index));
                }
            }
            Some(sub) => {
                for (index, item) in items.iter().enumerate() {
                    self.check(sub, item, &format!("{}/{}", pointer, index));
                }
            }
            None => {}
        }
    }

    fn check_string(&mut self, rules: &Map<String, Value>, s: &str, pointer: &str) {
        let length = s.chars().count() as u64;
        if let Some(min) = rules.get("minLength").and_then(Value::as_u64) {
            if length < min {
                self.fail(pointer, format!("shorter than {} characters", min));
            }
        }
        if let Some(max) = rules.get("maxLength").and_then(Value::as_u64) {
            if length > max {
                self.fail(pointer, format!("longer than {} characters", max));
            }
        }
    }

    fn check_number(&mut self, rules: &Map<String, Value>, n: f64, pointer: &str) {
        if let Some(min) = rules.get("minimum").and_then(Value::as_f64) {
            if n < min {
                self.fail(pointer, format!("{} is less than the minimum {}", n, min));
            }
        }
        if let Some(max) = rules.get("maximum").and_then(Value::as_f64) {
            if n > max {
                self.fail(pointer, format!("{} is greater than the maximum {}", n, max));
            }
        }
        if let Some(min) = rules.get("exclusiveMinimum").and_then(Value::as_f64) {
            if n <= min {
                self.fail(pointer, format!("{} must be greater than {}", n, min));
            }
        }
        if let Some(max) = rules.get("exclusiveMaximum").and_then(Value::as_f64) {
            if n >= max {
                self.fail(pointer, format!("{} must be less than {}", n, max));
            }
        }
    }
}
