use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::composition::{SubgraphSchema, compose};
use crate::config::GatewayConfig;
use crate::error::{RegistryError, SourceError};
use crate::supergraph::Supergraph;

/// A subgraph as delivered by a schema source: name, routing URL and SDL.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubgraphDefinition {
    pub name: String,
    pub url: String,
    pub sdl: String,
}

/// Supplies the current set of subgraph schemas.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn load_subgraph_schemas(&self) -> Result<Vec<SubgraphDefinition>, SourceError>;
}

/// Reads `supergraph.yaml`; schemas come from files next to it or from
/// the subgraphs themselves.
pub struct FileSchemaSource {
    config_path: PathBuf,
    client: reqwest::Client,
}

impl FileSchemaSource {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        FileSchemaSource {
            config_path: config_path.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SchemaSource for FileSchemaSource {
    async fn load_subgraph_schemas(&self) -> Result<Vec<SubgraphDefinition>, SourceError> {
        let config = GatewayConfig::load(&self.config_path)?;
        let config_dir = self.config_path.parent().unwrap_or_else(|| Path::new(""));

        let loads = config.subgraphs.into_iter().map(|(name, subgraph)| {
            let client = self.client.clone();
            async move {
                let sdl = match (&subgraph.schema.file, &subgraph.schema.subgraph_url) {
                    (Some(file), _) => read_schema_file(config_dir, file)?,
                    (None, Some(url)) => introspect(&client, &name, url).await?,
                    (None, None) => return Err(SourceError::MissingSchema(name)),
                };
                debug!(subgraph = %name, "loaded subgraph schema");
                Ok::<_, SourceError>(SubgraphDefinition {
                    name,
                    url: subgraph.routing_url,
                    sdl,
                })
            }
        });
        join_all(loads).await.into_iter().collect()
    }
}

/// Fetches every subgraph's SDL through `{ _service { sdl } }`.
pub struct IntrospectionSchemaSource {
    subgraphs: Vec<(String, String)>,
    client: reqwest::Client,
}

impl IntrospectionSchemaSource {
    /// `subgraphs` are `(name, url)` pairs.
    pub fn new(subgraphs: Vec<(String, String)>) -> Self {
        IntrospectionSchemaSource {
            subgraphs,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SchemaSource for IntrospectionSchemaSource {
    async fn load_subgraph_schemas(&self) -> Result<Vec<SubgraphDefinition>, SourceError> {
        let loads = self.subgraphs.iter().map(|(name, url)| async move {
            let sdl = introspect(&self.client, name, url).await?;
            Ok::<_, SourceError>(SubgraphDefinition {
                name: name.clone(),
                url: url.clone(),
                sdl,
            })
        });
        join_all(loads).await.into_iter().collect()
    }
}

/// A fixed list of subgraphs.
pub struct StaticSchemaSource(pub Vec<SubgraphDefinition>);

#[async_trait]
impl SchemaSource for StaticSchemaSource {
    async fn load_subgraph_schemas(&self) -> Result<Vec<SubgraphDefinition>, SourceError> {
        Ok(self.0.clone())
    }
}

fn read_schema_file(base_dir: &Path, file_path: &str) -> Result<String, SourceError> {
    let full_path = base_dir.join(file_path);
    debug!(path = %full_path.display(), "reading schema file");
    fs::read_to_string(&full_path).map_err(|source| SourceError::Io {
        path: full_path.display().to_string(),
        source,
    })
}

pub async fn introspect(
    client: &reqwest::Client,
    name: &str,
    url: &str,
) -> Result<String, SourceError> {
    let failed = |reason: String| SourceError::Introspection {
        subgraph: name.to_string(),
        reason,
    };

    let response = client
        .post(url)
        .header("Content-Type", "application/json")
        .json(&json!({ "query": "{_service{sdl}}", "variables": {} }))
        .send()
        .await
        .map_err(|e| failed(e.to_string()))?;
    if !response.status().is_success() {
        return Err(failed(format!("HTTP status {}", response.status().as_u16())));
    }
    let body = response
        .json::<Value>()
        .await
        .map_err(|e| failed(e.to_string()))?;
    body.pointer("/data/_service/sdl")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| failed("response has no `data._service.sdl`".to_string()))
}

#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    /// Adds or replaces one subgraph and recomposes.
    async fn register_service(
        &self,
        service: SubgraphDefinition,
    ) -> Result<Arc<Supergraph>, RegistryError>;

    /// Replaces the whole subgraph set with what `source` delivers.
    async fn reload(&self, source: &dyn SchemaSource) -> Result<Arc<Supergraph>, RegistryError>;

    /// The current supergraph snapshot.
    async fn get_schema(&self) -> Result<Arc<Supergraph>, RegistryError>;
}

/// Holds the registered subgraphs and the last supergraph that composed.
/// A failed parse or composition never replaces a good supergraph.
pub struct InMemorySchemaRegistry {
    services: RwLock<BTreeMap<String, SubgraphSchema>>,
    supergraph: RwLock<Option<Arc<Supergraph>>>,
}

impl InMemorySchemaRegistry {
    pub fn new() -> Self {
        InMemorySchemaRegistry {
            services: RwLock::new(BTreeMap::new()),
            supergraph: RwLock::new(None),
        }
    }

    /// Composes `candidate` and, on success, commits it together with the
    /// new supergraph. Callers hold the `services` write lock throughout,
    /// so concurrent updates never compose from a stale subgraph set.
    async fn commit(
        &self,
        services: &mut BTreeMap<String, SubgraphSchema>,
        candidate: Vec<SubgraphSchema>,
    ) -> Result<Arc<Supergraph>, RegistryError> {
        let composed = match compose(&candidate) {
            Ok(composed) => composed,
            Err(errors) => {
                for err in errors.iter() {
                    error!(kind = %err.kind, subgraphs = ?err.subgraphs, "{}", err.message);
                }
                error!("composition failed, keeping the previous supergraph");
                return Err(RegistryError::Composition(errors));
            }
        };
        let candidate = candidate
            .into_iter()
            .map(|subgraph| (subgraph.name.clone(), subgraph))
            .collect();

        let mut current = self.supergraph.write().await;
        if let Some(existing) = current.as_ref() {
            if existing.to_sdl() == composed.to_sdl() {
                debug!("supergraph unchanged");
                *services = candidate;
                return Ok(existing.clone());
            }
        }
        info!(
            subgraphs = composed.subgraphs.len(),
            types = composed.schema.types.len(),
            "composed supergraph"
        );
        let composed = Arc::new(composed);
        *current = Some(composed.clone());
        *services = candidate;
        Ok(composed)
    }
}

impl Default for InMemorySchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SchemaRegistry for InMemorySchemaRegistry {
    async fn register_service(
        &self,
        service: SubgraphDefinition,
    ) -> Result<Arc<Supergraph>, RegistryError> {
        let parsed = SubgraphSchema::parse(&service.name, &service.url, &service.sdl).map_err(
            |error| {
                error!(subgraph = %service.name, %error, "failed to parse subgraph schema");
                RegistryError::Parse {
                    service: service.name.clone(),
                    error,
                }
            },
        )?;

        let mut services = self.services.write().await;
        let mut candidate = services.clone();
        candidate.insert(service.name, parsed);
        let candidate = candidate.into_values().collect();
        self.commit(&mut services, candidate).await
    }

    async fn reload(&self, source: &dyn SchemaSource) -> Result<Arc<Supergraph>, RegistryError> {
        let definitions = source.load_subgraph_schemas().await?;

        let mut candidate = Vec::new();
        let mut first_failure = None;
        for definition in definitions {
            match SubgraphSchema::parse(&definition.name, &definition.url, &definition.sdl) {
                Ok(parsed) => candidate.push(parsed),
                Err(error) => {
                    error!(subgraph = %definition.name, %error, "excluding subgraph with invalid schema");
                    first_failure.get_or_insert(RegistryError::Parse {
                        service: definition.name,
                        error,
                    });
                }
            }
        }
        if candidate.is_empty() {
            if let Some(failure) = first_failure {
                return Err(failure);
            }
        }
        // Duplicate names reach composition, which rejects them.
        let mut services = self.services.write().await;
        self.commit(&mut services, candidate).await
    }

    async fn get_schema(&self) -> Result<Arc<Supergraph>, RegistryError> {
        self.supergraph
            .read()
            .await
            .clone()
            .ok_or(RegistryError::NotReady)
    }
}
