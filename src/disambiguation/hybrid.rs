use std::sync::Arc;

use super::{CheckCancelled, Disambiguator, MultiWordChunker, SpanPropagator};
use crate::config::DisambiguationConfig;
use crate::error::Result;
use crate::resource::ResourceResolver;
use crate::sentence::AnalyzedSentence;

pub const HYBRID_PROVENANCE: &str = "HybridDisambiguator";

/// Chunker, then span propagation, then rule-driven disambiguation
pub struct HybridDisambiguator {
    chunker: MultiWordChunker,
    propagator: SpanPropagator,
    disambiguator: Arc<dyn Disambiguator>,
}

impl HybridDisambiguator {
    pub fn new(chunker: MultiWordChunker, disambiguator: Arc<dyn Disambiguator>) -> Self {
        Self {
            chunker,
            propagator: SpanPropagator::default(),
            disambiguator,
        }
    }

    /// Build the pipeline from configuration, loading the multiword list
    /// through `resolver` when one is configured.
    pub fn from_config(
        config: &DisambiguationConfig,
        resolver: &dyn ResourceResolver,
        disambiguator: Arc<dyn Disambiguator>,
    ) -> Result<Self> {
        let chunker = match &config.multiwords {
            Some(name) => MultiWordChunker::from_resource(resolver, name)?,
            None => MultiWordChunker::default(),
        }
        .with_ignore_spelling(config.ignore_spelling);

        Ok(Self {
            chunker,
            propagator: SpanPropagator::new(&config.provenance),
            disambiguator,
        })
    }

    pub fn chunker(&self) -> &MultiWordChunker {
        &self.chunker
    }
}

impl std::fmt::Debug for HybridDisambiguator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridDisambiguator")
            .field("chunker", &self.chunker)
            .field("propagator", &self.propagator)
            .finish_non_exhaustive()
    }
}

impl Disambiguator for HybridDisambiguator {
    fn disambiguate(
        &self,
        sentence: AnalyzedSentence,
        cancel: &dyn CheckCancelled,
    ) -> Result<AnalyzedSentence> {
        let mut sentence = self.chunker.disambiguate(sentence, cancel)?;
        self.propagator.propagate(&mut sentence, cancel);
        self.disambiguator.disambiguate(sentence, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disambiguation::NotCancelled;
    use crate::resource::MemoryResolver;
    use crate::sentence::{AnalyzedToken, PosTag, TokenReading};

    struct Identity;

    impl Disambiguator for Identity {
        fn disambiguate(
            &self,
            sentence: AnalyzedSentence,
            _cancel: &dyn CheckCancelled,
        ) -> Result<AnalyzedSentence> {
            Ok(sentence)
        }
    }

    fn tagged(word: &str, tag: &str) -> AnalyzedToken {
        AnalyzedToken::new(
            word,
            vec![TokenReading::new(word, Some(PosTag::tag(tag)), Some(word))],
        )
    }

    #[test]
    fn test_multiword_becomes_single_reading_span() {
        let pipeline = HybridDisambiguator::new(
            MultiWordChunker::parse("New York\tNNP").unwrap().with_ignore_spelling(true),
            Arc::new(Identity),
        );
        let sentence = AnalyzedSentence::new(vec![
            tagged("to", "TO"),
            AnalyzedToken::whitespace(" "),
            tagged("New", "JJ"),
            AnalyzedToken::whitespace(" "),
            tagged("York", "NNP"),
        ]);

        let result = pipeline.disambiguate(sentence, &NotCancelled).unwrap();
        let tokens = result.tokens();
        assert_eq!(tokens.len(), 5);
        for position in [2, 4] {
            let readings = tokens[position].readings();
            assert_eq!(readings.len(), 1);
            assert_eq!(readings[0].pos_tag(), Some(&PosTag::tag("NNP")));
            assert_eq!(readings[0].lemma(), Some("New York"));
            assert_eq!(tokens[position].provenance(), Some(HYBRID_PROVENANCE));
            assert!(tokens[position].is_ignored_by_speller());
        }
        assert_eq!(tokens[0].readings()[0].pos_tag(), Some(&PosTag::tag("TO")));
    }

    #[test]
    fn test_from_config_loads_multiwords() {
        let resolver = MemoryResolver::new().with_resource("en/multiwords.txt", "ad hoc\tJJ\n");
        let config = DisambiguationConfig {
            multiwords: Some("en/multiwords.txt".to_string()),
            ignore_spelling: false,
            provenance: "EN_Hybrid".to_string(),
        };
        let pipeline = HybridDisambiguator::from_config(&config, &resolver, Arc::new(Identity)).unwrap();
        assert_eq!(pipeline.chunker().len(), 1);

        let sentence = AnalyzedSentence::new(vec![tagged("ad", "FW"), tagged("hoc", "FW")]);
        let result = pipeline.disambiguate(sentence, &NotCancelled).unwrap();
        assert_eq!(result.tokens()[1].provenance(), Some("EN_Hybrid"));
        assert!(!result.tokens()[0].is_ignored_by_speller());
        assert!(result.tokens()[1].is_ignored_by_speller());
    }

    #[test]
    fn test_missing_multiword_resource() {
        let config = DisambiguationConfig {
            multiwords: Some("en/missing.txt".to_string()),
            ..DisambiguationConfig::default()
        };
        assert!(
            HybridDisambiguator::from_config(&config, &MemoryResolver::new(), Arc::new(Identity))
                .is_err()
        );
    }
}
