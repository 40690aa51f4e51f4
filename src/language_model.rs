//! Per-language n-gram model lifecycle.
//!
//! A [`LanguageModelProvider`] belongs to one language. The first
//! [`get_model`](LanguageModelProvider::get_model) call checks for
//! `<index_root>/<short_code>` and either binds a model through the
//! [`ModelLoader`] or records the language as unavailable. Construction is
//! serialized, so concurrent callers see one attempt and share its result.
//! The missing-index warning is emitted at most once per provider.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::config::LanguageModelConfig;
use crate::error::Result;

/// Read access to an opened n-gram index
pub trait LanguageModel: Send + Sync {
    /// Occurrence count of the given n-gram
    fn count(&self, ngram: &[&str]) -> u64;

    fn total_token_count(&self) -> u64;

    /// Release the index. Called exactly once by the owning provider.
    fn close(&self);
}

/// Opens the index directory of one language
#[cfg_attr(test, mockall::automock)]
pub trait ModelLoader: Send + Sync {
    fn open(&self, index_dir: &Path) -> Result<Arc<dyn LanguageModel>>;
}

/// A flag that flips from unset to set exactly once
#[derive(Debug, Default)]
pub struct OneShotFlag(AtomicBool);

impl OneShotFlag {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Set the flag; true only for the single caller that flipped it
    pub fn set(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

enum ModelState {
    Unresolved,
    Bound(Arc<dyn LanguageModel>),
    Unavailable,
}

pub struct LanguageModelProvider {
    short_code: String,
    name: String,
    loader: Arc<dyn ModelLoader>,
    state: Mutex<ModelState>,
    warned: OneShotFlag,
}

impl LanguageModelProvider {
    pub fn new(short_code: &str, name: &str, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            short_code: short_code.to_string(),
            name: name.to_string(),
            loader,
            state: Mutex::new(ModelState::Unresolved),
            warned: OneShotFlag::new(),
        }
    }

    pub fn short_code(&self) -> &str {
        &self.short_code
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index_dir(&self, index_root: &Path) -> PathBuf {
        index_root.join(&self.short_code)
    }

    /// The bound model, or `None` when this language has no usable index
    pub fn get_model(&self, index_root: &Path) -> Option<Arc<dyn LanguageModel>> {
        let mut state = self.state.lock();
        match &*state {
            ModelState::Bound(model) => return Some(Arc::clone(model)),
            ModelState::Unavailable => return None,
            ModelState::Unresolved => {}
        }

        let index_dir = self.index_dir(index_root);
        let model = if index_dir.exists() {
            match self.loader.open(&index_dir) {
                Ok(model) => Some(model),
                Err(e) => {
                    self.warn_once(|| {
                        tracing::warn!(
                            "ngram index dir {} could not be opened for {}: {}",
                            index_dir.display(),
                            self.name,
                            e
                        )
                    });
                    None
                }
            }
        } else {
            self.warn_once(|| {
                tracing::warn!(
                    "ngram index dir {} not found for {}",
                    index_dir.display(),
                    self.name
                )
            });
            None
        };

        *state = match &model {
            Some(model) => {
                tracing::debug!("Bound ngram index {} for {}", index_dir.display(), self.name);
                ModelState::Bound(Arc::clone(model))
            }
            None => ModelState::Unavailable,
        };
        model
    }

    pub fn get_configured_model(&self, config: &LanguageModelConfig) -> Option<Arc<dyn LanguageModel>> {
        self.get_model(&config.index_root)
    }

    pub fn is_bound(&self) -> bool {
        matches!(*self.state.lock(), ModelState::Bound(_))
    }

    /// Forget an "unavailable" verdict so the next request checks the
    /// index directory again. A bound model is kept.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        if matches!(*state, ModelState::Unavailable) {
            *state = ModelState::Unresolved;
        }
    }

    /// Release the bound model, if any. Further calls are no-ops until a
    /// model is bound again.
    pub fn close(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), ModelState::Unresolved);
        if let ModelState::Bound(model) = previous {
            model.close();
            tracing::debug!("Closed ngram index for {}", self.name);
        }
    }

    fn warn_once(&self, warn: impl FnOnce()) {
        if self.warned.set() {
            warn();
        }
    }
}

impl Drop for LanguageModelProvider {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for LanguageModelProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanguageModelProvider")
            .field("short_code", &self.short_code)
            .field("name", &self.name)
            .field("bound", &self.is_bound())
            .field("warned", &self.warned.is_set())
            .finish()
    }
}
