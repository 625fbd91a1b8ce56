//! Error types for every stage of the gateway pipeline.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Malformed subgraph SDL. Fatal to that subgraph's registration only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{line}:{column}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, column: usize, message: impl Into<String>) -> Self {
        ParseError {
            line,
            column,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum CompositionErrorKind {
    DuplicateSubgraph,
    TypeKindMismatch,
    FieldTypeMismatch,
    ArgumentTypeMismatch,
    MissingEntityOwner,
    MultipleEntityOwners,
    KeyMismatch,
    UnresolvableExternalField,
    InvalidRequires,
    InvalidProvides,
    UndefinedType,
    MissingQueryType,
}

impl fmt::Display for CompositionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            CompositionErrorKind::DuplicateSubgraph => "DUPLICATE_SUBGRAPH",
            CompositionErrorKind::TypeKindMismatch => "TYPE_KIND_MISMATCH",
            CompositionErrorKind::FieldTypeMismatch => "FIELD_TYPE_MISMATCH",
            CompositionErrorKind::ArgumentTypeMismatch => "ARGUMENT_TYPE_MISMATCH",
            CompositionErrorKind::MissingEntityOwner => "MISSING_ENTITY_OWNER",
            CompositionErrorKind::MultipleEntityOwners => "MULTIPLE_ENTITY_OWNERS",
            CompositionErrorKind::KeyMismatch => "KEY_MISMATCH",
            CompositionErrorKind::UnresolvableExternalField => "UNRESOLVABLE_EXTERNAL_FIELD",
            CompositionErrorKind::InvalidRequires => "INVALID_REQUIRES",
            CompositionErrorKind::InvalidProvides => "INVALID_PROVIDES",
            CompositionErrorKind::UndefinedType => "UNDEFINED_TYPE",
            CompositionErrorKind::MissingQueryType => "MISSING_QUERY_TYPE",
        };
        f.write_str(code)
    }
}

/// A single schema conflict found while composing subgraphs.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("[{kind}] {message}")]
pub struct CompositionError {
    pub kind: CompositionErrorKind,
    pub type_name: String,
    pub field: Option<String>,
    pub subgraphs: Vec<String>,
    pub message: String,
}

/// Every conflict found by one composition run, in a deterministic order.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct CompositionErrors(pub Vec<CompositionError>);

impl CompositionErrors {
    pub fn iter(&self) -> impl Iterator<Item = &CompositionError> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CompositionErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "composition failed with {} error(s)", self.0.len())?;
        for error in &self.0 {
            write!(f, "\n  {}", error)?;
        }
        Ok(())
    }
}

/// A client operation that cannot be planned. Surfaced as a top-level
/// GraphQL error, never with partial data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("failed to parse query: {0}")]
    InvalidQuery(String),

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("unknown fragment `{0}`")]
    UnknownFragment(String),

    #[error("fragment `{0}` spreads itself")]
    FragmentCycle(String),

    #[error("cannot resolve field at `{}`", path.join("."))]
    UnresolvableField { path: Vec<String> },

    #[error("query plan contains a circular dependency")]
    CircularDependency,
}

impl PlanError {
    pub fn code(&self) -> &'static str {
        match self {
            PlanError::InvalidQuery(_) => "GRAPHQL_PARSE_FAILED",
            PlanError::UnknownOperation(_)
            | PlanError::UnknownFragment(_)
            | PlanError::FragmentCycle(_)
            | PlanError::UnsupportedOperation(_) => "GRAPHQL_VALIDATION_FAILED",
            PlanError::UnresolvableField { .. } | PlanError::CircularDependency => {
                "QUERY_PLANNING_FAILED"
            }
        }
    }
}

/// A failed subgraph request. Localised to the affected response subtree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("request to subgraph `{subgraph}` failed: {reason}")]
    Request { subgraph: String, reason: String },

    #[error("subgraph `{subgraph}` responded with HTTP status {status}")]
    Status { subgraph: String, status: u16 },

    #[error("invalid response from subgraph `{subgraph}`: {reason}")]
    Decode { subgraph: String, reason: String },

    #[error("request to subgraph `{subgraph}` timed out after {timeout_ms}ms")]
    Timeout { subgraph: String, timeout_ms: u64 },

    #[error("unknown subgraph `{0}`")]
    UnknownSubgraph(String),
}

impl FetchError {
    pub fn subgraph(&self) -> &str {
        match self {
            FetchError::Request { subgraph, .. }
            | FetchError::Status { subgraph, .. }
            | FetchError::Decode { subgraph, .. }
            | FetchError::Timeout { subgraph, .. } => subgraph,
            FetchError::UnknownSubgraph(subgraph) => subgraph,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            FetchError::Timeout { .. } => "SUBREQUEST_TIMEOUT",
            _ => "SUBREQUEST_HTTP_ERROR",
        }
    }
}

/// Failures that abort a whole execution uniformly.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("execution cancelled")]
    Cancelled,

    #[error("execution deadline exceeded")]
    DeadlineExceeded,
}

/// Failure to load subgraph schemas from a schema source.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Config(#[from] serde_yaml::Error),

    #[error("failed to introspect subgraph `{subgraph}`: {reason}")]
    Introspection { subgraph: String, reason: String },

    #[error("subgraph `{0}` has neither a schema file nor a subgraph_url")]
    MissingSchema(String),
}

/// Operator-facing failures of the schema registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("failed to parse schema for service {service}: {error}")]
    Parse { service: String, error: ParseError },

    #[error(transparent)]
    Composition(#[from] CompositionErrors),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("no supergraph has been composed yet")]
    NotReady,
}

/// An error in the GraphQL response format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, Value>,
}

impl GraphQLError {
    pub fn new(message: impl Into<String>, code: &str) -> Self {
        let mut extensions = BTreeMap::new();
        extensions.insert("code".to_string(), Value::String(code.to_string()));
        GraphQLError {
            message: message.into(),
            path: None,
            extensions,
        }
    }

    pub fn with_path(mut self, path: Vec<Value>) -> Self {
        self.path = Some(path);
        self
    }

    pub fn with_extension(mut self, key: &str, value: Value) -> Self {
        self.extensions.insert(key.to_string(), value);
        self
    }

    pub fn code(&self) -> Option<&str> {
        self.extensions.get("code").and_then(Value::as_str)
    }
}

impl From<&PlanError> for GraphQLError {
    fn from(err: &PlanError) -> Self {
        let error = GraphQLError::new(err.to_string(), err.code());
        match err {
            PlanError::UnresolvableField { path } => error.with_path(
                path.iter().map(|segment| Value::String(segment.clone())).collect(),
            ),
            _ => error,
        }
    }
}

impl From<&ExecutionError> for GraphQLError {
    fn from(err: &ExecutionError) -> Self {
        GraphQLError::new(err.to_string(), "EXECUTION_CANCELLED")
    }
}

impl From<&RegistryError> for GraphQLError {
    fn from(err: &RegistryError) -> Self {
        match err {
            RegistryError::NotReady => GraphQLError::new(err.to_string(), "INTERNAL_SERVER_ERROR"),
            _ => GraphQLError::new("schema is unavailable", "INTERNAL_SERVER_ERROR"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plan_error_carries_path_and_code() {
        let err = PlanError::UnresolvableField {
            path: vec!["me".to_string(), "secret".to_string()],
        };
        let gql = GraphQLError::from(&err);
        assert_eq!(gql.code(), Some("QUERY_PLANNING_FAILED"));
        assert_eq!(gql.path, Some(vec![json!("me"), json!("secret")]));
        assert_eq!(gql.message, "cannot resolve field at `me.secret`");
    }

    #[test]
    fn graphql_error_omits_empty_members() {
        let error = GraphQLError {
            message: "boom".to_string(),
            path: None,
            extensions: BTreeMap::new(),
        };
        assert_eq!(serde_json::to_value(&error).unwrap(), json!({"message": "boom"}));
    }

    #[test]
    fn composition_errors_list_every_conflict() {
        let errors = CompositionErrors(vec![
            CompositionError {
                kind: CompositionErrorKind::FieldTypeMismatch,
                type_name: "User".to_string(),
                field: Some("id".to_string()),
                subgraphs: vec!["a".to_string(), "b".to_string()],
                message: "User.id has conflicting types".to_string(),
            },
            CompositionError {
                kind: CompositionErrorKind::MissingEntityOwner,
                type_name: "Product".to_string(),
                field: None,
                subgraphs: vec!["b".to_string()],
                message: "Product has no owner".to_string(),
            },
        ]);
        let rendered = errors.to_string();
        assert!(rendered.contains("2 error(s)"));
        assert!(rendered.contains("[FIELD_TYPE_MISMATCH]"));
        assert!(rendered.contains("[MISSING_ENTITY_OWNER]"));
    }
}
