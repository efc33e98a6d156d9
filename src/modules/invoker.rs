// Enrichment request/response types and the invoker seam

use crate::error::{GlueError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

/// One query against one module for one attribute
#[derive(Debug, Clone, Copy)]
pub struct EnrichmentRequest<'a> {
    pub module: &'a str,
    pub attribute_type: &'a str,
    pub attribute_value: &'a str,
    /// Operator-supplied module configuration, forwarded verbatim
    pub config: Option<&'a Value>,
}

impl EnrichmentRequest<'_> {
    /// Body for the module service's `/query` endpoint:
    /// `{"module": name, <type>: <value>, "config"?: ...}`
    pub fn to_payload(&self) -> Value {
        let mut body = Map::new();
        body.insert("module".to_string(), Value::String(self.module.to_string()));
        body.insert(
            self.attribute_type.to_string(),
            Value::String(self.attribute_value.to_string()),
        );
        if let Some(config) = self.config {
            body.insert("config".to_string(), config.clone());
        }
        Value::Object(body)
    }
}

/// A group of values the module returned under a shared set of types
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultGroup {
    pub types: Vec<String>,
    pub values: Vec<String>,
}

/// Parsed module answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrichmentResponse {
    /// The module ran and reported a failure of its own
    ModuleError(String),
    Results(Vec<ResultGroup>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<Value>),
    One(Value),
}

impl OneOrMany {
    fn into_strings(self) -> Vec<String> {
        let values = match self {
            OneOrMany::Many(v) => v,
            OneOrMany::One(v) => vec![v],
        };
        values.into_iter().filter_map(value_to_string).collect()
    }
}

fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[derive(Deserialize)]
struct RawGroup {
    #[serde(default)]
    types: Option<OneOrMany>,
    #[serde(default)]
    values: Option<OneOrMany>,
}

impl EnrichmentResponse {
    /// Interpret a module service response body
    pub fn parse(module: &str, body: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(body).map_err(|e| GlueError::Json {
            source: e,
            context: format!("Module {} returned invalid JSON", module),
        })?;

        let Value::Object(mut object) = value else {
            return Err(malformed(module, "response is not a JSON object"));
        };

        if let Some(error) = object.remove("error") {
            let message = match error {
                Value::String(s) => s,
                other => other.to_string(),
            };
            return Ok(EnrichmentResponse::ModuleError(message));
        }

        let results = object
            .remove("results")
            .ok_or_else(|| malformed(module, "neither 'error' nor 'results' present"))?;

        let groups: Vec<RawGroup> = serde_json::from_value(results).map_err(|e| {
            malformed(module, &format!("'results' is not a list of groups: {}", e))
        })?;

        Ok(EnrichmentResponse::Results(
            groups
                .into_iter()
                .map(|g| ResultGroup {
                    types: g.types.map(OneOrMany::into_strings).unwrap_or_default(),
                    values: g.values.map(OneOrMany::into_strings).unwrap_or_default(),
                })
                .collect(),
        ))
    }
}

fn malformed(module: &str, message: &str) -> GlueError {
    GlueError::MalformedResponse {
        context: format!("module {}", module),
        message: message.to_string(),
    }
}

/// Sends enrichment requests to wherever modules run
#[async_trait]
pub trait ModuleInvoker: Send + Sync {
    /// Run one module against one attribute. Transport and payload failures are
    /// errors; a module-reported failure is `Ok(EnrichmentResponse::ModuleError)`.
    async fn invoke(&self, request: &EnrichmentRequest<'_>) -> Result<EnrichmentResponse>;
}
