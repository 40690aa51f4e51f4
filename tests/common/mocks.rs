use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rulecore::{
    AnalyzedSentence, DisambiguationInputError, DisambiguationRule, LanguageModel, ModelLoader,
    PosTag, Result, RuleMatcher, TokenReading,
};

/// Rule matcher that records which rules it saw and, for rules listed in
/// `keep`, narrows every token carrying the kept tag to that tag
pub struct RecordingMatcher {
    applied: Mutex<Vec<String>>,
    keep: HashMap<String, String>,
}

impl RecordingMatcher {
    pub fn new() -> Self {
        Self {
            applied: Mutex::new(Vec::new()),
            keep: HashMap::new(),
        }
    }

    pub fn keeping(mut self, rule_id: &str, tag: &str) -> Self {
        self.keep.insert(rule_id.to_string(), tag.to_string());
        self
    }

    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }
}

impl RuleMatcher for RecordingMatcher {
    fn apply(
        &self,
        rule: &DisambiguationRule,
        sentence: &mut AnalyzedSentence,
    ) -> std::result::Result<(), DisambiguationInputError> {
        self.applied.lock().unwrap().push(rule.label());

        let Some(tag) = rule.id.as_ref().and_then(|id| self.keep.get(id)) else {
            return Ok(());
        };
        let tag = PosTag::tag(tag.as_str());
        for position in 0..sentence.len() {
            let kept: Vec<TokenReading> = sentence.tokens()[position]
                .readings()
                .iter()
                .filter(|reading| reading.pos_tag() == Some(&tag))
                .cloned()
                .collect();
            if !kept.is_empty() {
                sentence.set_readings(position, kept, &rule.label())?;
            }
        }
        Ok(())
    }
}

/// In-memory n-gram counts
#[derive(Default)]
pub struct FixedModel {
    counts: HashMap<String, u64>,
    closed: AtomicUsize,
}

impl FixedModel {
    pub fn with_count(mut self, ngram: &str, count: u64) -> Self {
        self.counts.insert(ngram.to_string(), count);
        self
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl LanguageModel for FixedModel {
    fn count(&self, ngram: &[&str]) -> u64 {
        self.counts.get(&ngram.join(" ")).copied().unwrap_or(0)
    }

    fn total_token_count(&self) -> u64 {
        self.counts.values().sum()
    }

    fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Loader handing out one shared model and logging every open
pub struct RecordingLoader {
    model: Arc<FixedModel>,
    opened: Mutex<Vec<PathBuf>>,
}

impl RecordingLoader {
    pub fn new(model: Arc<FixedModel>) -> Self {
        Self {
            model,
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn opened(&self) -> Vec<PathBuf> {
        self.opened.lock().unwrap().clone()
    }
}

impl ModelLoader for RecordingLoader {
    fn open(&self, index_dir: &Path) -> Result<Arc<dyn LanguageModel>> {
        self.opened.lock().unwrap().push(index_dir.to_path_buf());
        Ok(Arc::clone(&self.model) as Arc<dyn LanguageModel>)
    }
}
