use crate::cache::content_hash;
use crate::registry::ModuleId;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};

/// Source of raw module payloads
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn fetch(&self, module_id: &str) -> anyhow::Result<String>;

    /// Hash of the current payload. Stores that can answer without reading the
    /// whole payload should override this.
    async fn content_hash(&self, module_id: &str) -> anyhow::Result<String> {
        let payload = self.fetch(module_id).await?;
        Ok(content_hash(&payload))
    }
}

/// Payloads held in memory
#[derive(Debug, Default)]
pub struct InMemoryContentStore {
    payloads: DashMap<ModuleId, String>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload(self, id: impl Into<String>, payload: impl Into<String>) -> Self {
        self.payloads.insert(id.into(), payload.into());
        self
    }

    pub fn insert(&self, id: impl Into<String>, payload: impl Into<String>) {
        self.payloads.insert(id.into(), payload.into());
    }

    /// Replace an existing payload, returning the previous one
    pub fn update(&self, id: &str, payload: impl Into<String>) -> Option<String> {
        let mut entry = self.payloads.get_mut(id)?;
        Some(std::mem::replace(entry.value_mut(), payload.into()))
    }

    pub fn remove(&self, id: &str) -> Option<String> {
        self.payloads.remove(id).map(|(_, payload)| payload)
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn fetch(&self, module_id: &str) -> anyhow::Result<String> {
        self.payloads
            .get(module_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| anyhow!("no payload stored for module '{}'", module_id))
    }

    async fn content_hash(&self, module_id: &str) -> anyhow::Result<String> {
        self.payloads
            .get(module_id)
            .map(|entry| content_hash(entry.value()))
            .ok_or_else(|| anyhow!("no payload stored for module '{}'", module_id))
    }
}

/// Payloads read from `<root>/<id>.<extension>`
#[derive(Debug, Clone)]
pub struct FsContentStore {
    root: PathBuf,
    extension: String,
}

impl FsContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extension: "md".to_string(),
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, module_id: &str) -> anyhow::Result<PathBuf> {
        let valid = !module_id.is_empty()
            && module_id != "."
            && module_id != ".."
            && !module_id.contains(|c: char| c == '/' || c == '\\');
        if !valid {
            return Err(anyhow!("module id '{}' is not a valid file name", module_id));
        }
        Ok(self
            .root
            .join(format!("{}.{}", module_id, self.extension)))
    }
}

#[async_trait]
impl ContentStore for FsContentStore {
    async fn fetch(&self, module_id: &str) -> anyhow::Result<String> {
        let path = self.path_for(module_id)?;
        tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))
    }
}
