//! Sentence disambiguation pipeline
//!
//! Every stage implements [`Disambiguator`]. The [`HybridDisambiguator`]
//! composes a multiword chunker, span propagation and rule-driven
//! disambiguation. All stages poll a [`CheckCancelled`] and hand back a
//! valid, partially processed sentence when it fires.

mod chunker;
mod hybrid;
mod rules;
mod span;

pub use chunker::{MULTIWORD_CHUNKER_PROVENANCE, MultiWord, MultiWordChunker};
pub use hybrid::{HYBRID_PROVENANCE, HybridDisambiguator};
pub use rules::{DisambiguationRule, RuleKind, RuleMatcher, RuleSet, XmlRuleDisambiguator};
pub use span::SpanPropagator;

use crate::error::Result;
use crate::sentence::AnalyzedSentence;

/// Cooperative cancellation, polled at token and rule granularity
pub trait CheckCancelled {
    fn check_cancelled(&self) -> bool;
}

impl<F> CheckCancelled for F
where
    F: Fn() -> bool,
{
    fn check_cancelled(&self) -> bool {
        self()
    }
}

/// Never cancels
#[derive(Debug, Clone, Copy, Default)]
pub struct NotCancelled;

impl CheckCancelled for NotCancelled {
    fn check_cancelled(&self) -> bool {
        false
    }
}

pub trait Disambiguator: Send + Sync {
    /// Reduce the readings of `sentence`. Cancellation is not an error: the
    /// sentence comes back in whatever state processing reached.
    fn disambiguate(
        &self,
        sentence: AnalyzedSentence,
        cancel: &dyn CheckCancelled,
    ) -> Result<AnalyzedSentence>;

    /// One result per input sentence; a malformed sentence does not stop
    /// the rest of the batch.
    fn disambiguate_batch(
        &self,
        sentences: Vec<AnalyzedSentence>,
        cancel: &dyn CheckCancelled,
    ) -> Vec<Result<AnalyzedSentence>> {
        sentences
            .into_iter()
            .map(|sentence| self.disambiguate(sentence, cancel))
            .collect()
    }
}
