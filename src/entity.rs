//! External-entity resolution policy.
//!
//! Only references whose system id ends in the internal-entity suffix are
//! ever substituted, and then only with content served by the
//! [`ResourceResolver`]. Everything else resolves to "no substitution".

use std::fmt;
use std::sync::Arc;

use crate::resource::ResourceResolver;

pub const DEFAULT_ENTITY_SUFFIX: &str = ".ent";

#[derive(Clone)]
pub struct EntityPolicy {
    resolver: Arc<dyn ResourceResolver>,
    suffix: String,
}

impl fmt::Debug for EntityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityPolicy")
            .field("suffix", &self.suffix)
            .finish_non_exhaustive()
    }
}

impl EntityPolicy {
    pub fn new(resolver: Arc<dyn ResourceResolver>) -> Self {
        Self {
            resolver,
            suffix: DEFAULT_ENTITY_SUFFIX.to_string(),
        }
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn resolver(&self) -> &Arc<dyn ResourceResolver> {
        &self.resolver
    }

    /// Resource name an allowed system id maps to, `None` if the reference
    /// must not be followed.
    ///
    /// `file:` schemes and `.`/`..` segments are dropped, so
    /// `../../../en/entities.ent` asks the resolver for `en/entities.ent`.
    pub fn internal_path(&self, system_id: &str) -> Option<String> {
        if self.suffix.is_empty() || !system_id.ends_with(&self.suffix) {
            return None;
        }
        let path = system_id
            .strip_prefix("file://")
            .or_else(|| system_id.strip_prefix("file:"))
            .unwrap_or(system_id);
        if path.contains("://") {
            return None;
        }
        let segments: Vec<&str> = path
            .split(['/', '\\'])
            .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
            .collect();
        if segments.is_empty() {
            None
        } else {
            Some(segments.join("/"))
        }
    }

    /// Content to substitute for `system_id`, or `None` for no substitution
    pub fn resolve(&self, system_id: &str) -> Option<Vec<u8>> {
        let name = self.internal_path(system_id)?;
        match self.resolver.read_bytes(&name) {
            Ok(data) => Some(data),
            Err(e) => {
                tracing::debug!("Entity {} not resolvable as {}: {}", system_id, name, e);
                None
            }
        }
    }
}
