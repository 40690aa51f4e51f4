//! Classpath-like resource access.
//!
//! Rule files, entity fragments, DTDs and schemas are all looked up by name
//! through a [`ResourceResolver`]. Names use `/` separators and are always
//! relative to the resolver's root; a leading `/` is ignored.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};

use crate::error::{Result, RuleCoreError};

/// Supplies byte streams and stable locations for named resources
pub trait ResourceResolver: Send + Sync {
    /// Open the named resource for reading
    fn get_as_stream(&self, name: &str) -> Result<Box<dyn Read + Send>>;

    /// Resolve the named resource to a location string usable as a system id
    fn get_as_location(&self, name: &str) -> Result<String>;

    /// Read the whole resource into memory
    fn read_bytes(&self, name: &str) -> Result<Vec<u8>> {
        let mut stream = self.get_as_stream(name)?;
        let mut data = Vec::new();
        stream.read_to_end(&mut data)?;
        Ok(data)
    }
}

/// Split a resource name into its plain path segments.
///
/// Returns `None` when the name tries to leave the resource root.
fn normalized_segments(name: &str) -> Option<Vec<&str>> {
    let mut segments = Vec::new();
    for component in Path::new(name.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => segments.push(part.to_str()?),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments)
    }
}

/// Resolves resources from files below a root directory
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    root: PathBuf,
}

impl DirectoryResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve_path(&self, name: &str) -> Result<PathBuf> {
        let segments = normalized_segments(name).ok_or_else(|| RuleCoreError::not_found(name))?;
        let path = segments
            .iter()
            .fold(self.root.clone(), |path, segment| path.join(segment));
        if path.is_file() {
            Ok(path)
        } else {
            Err(RuleCoreError::not_found(name))
        }
    }
}

impl ResourceResolver for DirectoryResolver {
    fn get_as_stream(&self, name: &str) -> Result<Box<dyn Read + Send>> {
        let path = self.resolve_path(name)?;
        let file = File::open(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => RuleCoreError::not_found(name),
            _ => RuleCoreError::Io(e),
        })?;
        Ok(Box::new(file))
    }

    fn get_as_location(&self, name: &str) -> Result<String> {
        let path = self.resolve_path(name)?;
        let absolute = path.canonicalize().unwrap_or(path);
        Ok(absolute.display().to_string())
    }
}

/// In-memory resource set, keyed by normalized name
#[derive(Debug, Clone, Default)]
pub struct MemoryResolver {
    resources: HashMap<String, Vec<u8>>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource(mut self, name: &str, data: impl Into<Vec<u8>>) -> Self {
        self.insert(name, data);
        self
    }

    pub fn insert(&mut self, name: &str, data: impl Into<Vec<u8>>) {
        if let Some(key) = Self::key(name) {
            self.resources.insert(key, data.into());
        }
    }

    fn key(name: &str) -> Option<String> {
        normalized_segments(name).map(|segments| segments.join("/"))
    }

    fn lookup(&self, name: &str) -> Result<&Vec<u8>> {
        Self::key(name)
            .and_then(|key| self.resources.get(&key))
            .ok_or_else(|| RuleCoreError::not_found(name))
    }
}

impl ResourceResolver for MemoryResolver {
    fn get_as_stream(&self, name: &str) -> Result<Box<dyn Read + Send>> {
        let data = self.lookup(name)?.clone();
        Ok(Box::new(Cursor::new(data)))
    }

    fn get_as_location(&self, name: &str) -> Result<String> {
        self.lookup(name)?;
        let key = Self::key(name).ok_or_else(|| RuleCoreError::not_found(name))?;
        Ok(format!("memory:/{}", key))
    }
}
