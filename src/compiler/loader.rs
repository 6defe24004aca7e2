use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::compiler::core::Compiler;
use crate::dsl::ProcessModel;
use crate::error::{EngineError, Result};
use crate::runtime::definition::ProcessDefinition;

/// Reads a model document; `.json` files are parsed as JSON, anything else as YAML.
pub fn load_model_from_file(path: &Path) -> Result<ProcessModel> {
    let content = fs::read_to_string(path).map_err(|source| EngineError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_model(&content, path)
}

fn parse_model(content: &str, path: &Path) -> Result<ProcessModel> {
    let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
    let parsed = if is_json {
        serde_json::from_str::<ProcessModel>(content).map_err(|e| e.to_string())
    } else {
        serde_yaml::from_str::<ProcessModel>(content).map_err(|e| e.to_string())
    };
    parsed.map_err(|reason| EngineError::DefinitionInvalid {
        model_id: path.display().to_string(),
        reason,
    })
}

/// Where process models come from.
pub trait DefinitionSource: Send + Sync {
    /// Returns the model for `model_id` or `DefinitionNotFound`.
    fn fetch(&self, model_id: &str) -> Result<ProcessModel>;
}

/// Models laid out on disk as `<root>/<group>/<name>/<name>.yaml`.
///
/// Also accepted, in order: `<name>.yml`, `<name>.json`, `<name>-phase1.yaml`.
/// Ids without a group resolve to `<root>/<id>.yaml|.yml|.json`.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn candidates(&self, model_id: &str) -> Vec<PathBuf> {
        match model_id.split_once('/') {
            Some((group, name)) => {
                let dir = self.root.join(group).join(name);
                vec![
                    dir.join(format!("{name}.yaml")),
                    dir.join(format!("{name}.yml")),
                    dir.join(format!("{name}.json")),
                    dir.join(format!("{name}-phase1.yaml")),
                ]
            }
            None => vec![
                self.root.join(format!("{model_id}.yaml")),
                self.root.join(format!("{model_id}.yml")),
                self.root.join(format!("{model_id}.json")),
            ],
        }
    }
}

impl DefinitionSource for DirectorySource {
    fn fetch(&self, model_id: &str) -> Result<ProcessModel> {
        if model_id.is_empty() || model_id.split('/').any(|part| part.is_empty() || part == "..") {
            return Err(EngineError::DefinitionNotFound {
                model_id: model_id.to_string(),
            });
        }
        for path in self.candidates(model_id) {
            match fs::read_to_string(&path) {
                Ok(content) => {
                    info!(model_id, path = %path.display(), "loading process model");
                    let mut model = parse_model(&content, &path)?;
                    model.id = model_id.to_string();
                    return Ok(model);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(source) => {
                    return Err(EngineError::Io {
                        path: path.display().to_string(),
                        source,
                    });
                }
            }
        }
        Err(EngineError::DefinitionNotFound {
            model_id: model_id.to_string(),
        })
    }
}

/// Models registered in memory, keyed by model id.
#[derive(Debug, Default)]
pub struct InMemorySource {
    models: DashMap<String, ProcessModel>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, model: ProcessModel) {
        self.models.insert(model.id.clone(), model);
    }

    pub fn remove(&self, model_id: &str) -> Option<ProcessModel> {
        self.models.remove(model_id).map(|(_, m)| m)
    }
}

impl DefinitionSource for InMemorySource {
    fn fetch(&self, model_id: &str) -> Result<ProcessModel> {
        self.models
            .get(model_id)
            .map(|m| m.value().clone())
            .ok_or_else(|| EngineError::DefinitionNotFound {
                model_id: model_id.to_string(),
            })
    }
}

/// Compiles models on first use and caches them by model id. Entries are
/// only replaced by an explicit `reload` or `invalidate_all`.
pub struct DefinitionLoader {
    source: Arc<dyn DefinitionSource>,
    cache: DashMap<String, Arc<ProcessDefinition>>,
}

impl DefinitionLoader {
    pub fn new(source: Arc<dyn DefinitionSource>) -> Self {
        Self {
            source,
            cache: DashMap::new(),
        }
    }

    pub fn from_dir(root: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(DirectorySource::new(root)))
    }

    pub fn load(&self, model_id: &str) -> Result<Arc<ProcessDefinition>> {
        if let Some(definition) = self.cache.get(model_id) {
            return Ok(definition.clone());
        }
        let compiled = self.compile(model_id)?;
        // a concurrent load may have won; keep whichever landed first
        let entry = self.cache.entry(model_id.to_string()).or_insert(compiled);
        Ok(entry.value().clone())
    }

    /// Recompiles from the source and replaces the cached entry. On failure
    /// the previous entry stays in place.
    pub fn reload(&self, model_id: &str) -> Result<Arc<ProcessDefinition>> {
        let compiled = self.compile(model_id)?;
        self.cache.insert(model_id.to_string(), compiled.clone());
        info!(model_id, digest = %compiled.digest(), "process definition reloaded");
        Ok(compiled)
    }

    pub fn cached(&self, model_id: &str) -> Option<Arc<ProcessDefinition>> {
        self.cache.get(model_id).map(|d| d.clone())
    }

    pub fn invalidate_all(&self) {
        self.cache.clear();
    }

    fn compile(&self, model_id: &str) -> Result<Arc<ProcessDefinition>> {
        let model = self.source.fetch(model_id)?;
        let definition = Compiler::new().compile(model)?;
        debug!(model_id, nodes = definition.nodes().len(), "process definition compiled");
        Ok(Arc::new(definition))
    }
}
