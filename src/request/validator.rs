//! Response body validation

use bytes::Bytes;
use serde_json::Value;

/// Decides whether an otherwise successful response is acceptable.
///
/// `json` is the decoded body when the descriptor expects JSON.
pub trait ResponseValidator: Send + Sync {
    fn validate(&self, body: &Bytes, json: Option<&Value>) -> bool;
}

impl<F> ResponseValidator for F
where
    F: Fn(&Bytes, Option<&Value>) -> bool + Send + Sync,
{
    fn validate(&self, body: &Bytes, json: Option<&Value>) -> bool {
        self(body, json)
    }
}

/// Checks a JSON body against a template value.
///
/// Objects must carry every template key with a matching value, arrays must
/// have every element match the first template element, and scalars must be
/// of the same JSON kind. `null` in the template accepts anything.
#[derive(Debug, Clone)]
pub struct JsonShapeValidator {
    template: Value,
}

impl JsonShapeValidator {
    pub fn new(template: Value) -> Self {
        Self { template }
    }

    pub fn matches(&self, value: &Value) -> bool {
        shape_matches(&self.template, value)
    }
}

impl ResponseValidator for JsonShapeValidator {
    fn validate(&self, _body: &Bytes, json: Option<&Value>) -> bool {
        json.is_some_and(|json| self.matches(json))
    }
}

fn shape_matches(template: &Value, value: &Value) -> bool {
    match (template, value) {
        (Value::Null, _) => true,
        (Value::Object(expected), Value::Object(actual)) => expected.iter().all(|(key, shape)| {
            actual
                .get(key)
                .is_some_and(|value| shape_matches(shape, value))
        }),
        (Value::Array(expected), Value::Array(actual)) => match expected.first() {
            Some(shape) => actual.iter().all(|value| shape_matches(shape, value)),
            None => true,
        },
        (Value::String(_), Value::String(_))
        | (Value::Number(_), Value::Number(_))
        | (Value::Bool(_), Value::Bool(_)) => true,
        _ => false,
    }
}
