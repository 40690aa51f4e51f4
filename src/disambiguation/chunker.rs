//! Multiword-expression chunker.
//!
//! Marks every occurrence of a listed phrase with a span-open reading on its
//! first token and a span-close reading on its last, both carrying the
//! phrase as lemma. The readings already present are kept; resolving the
//! spans is left to [`SpanPropagator`](super::SpanPropagator).

use std::collections::HashMap;
use std::io::Read;

use super::{CheckCancelled, Disambiguator};
use crate::error::{DisambiguationInputError, Result};
use crate::resource::ResourceResolver;
use crate::sentence::{AnalyzedSentence, PosTag, TokenReading};

pub const MULTIWORD_CHUNKER_PROVENANCE: &str = "MultiWordChunker";

/// One entry of a multiword list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiWord {
    words: Vec<String>,
    tag: String,
    phrase: String,
}

impl MultiWord {
    pub fn new(phrase: &str, tag: &str) -> std::result::Result<Self, String> {
        let words: Vec<String> = phrase.split_whitespace().map(str::to_string).collect();
        if words.len() < 2 {
            return Err(format!("'{}' is not a multiword phrase", phrase));
        }
        match PosTag::parse(tag) {
            Ok(PosTag::Tag(tag)) if !tag.is_empty() => Ok(Self {
                phrase: words.join(" "),
                words,
                tag,
            }),
            _ => Err(format!("'{}' is not a plain tag", tag)),
        }
    }

    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }
}

#[derive(Debug, Clone, Default)]
pub struct MultiWordChunker {
    // entries keyed by their first word, in list order
    by_first_word: HashMap<String, Vec<MultiWord>>,
    ignore_spelling: bool,
}

impl MultiWordChunker {
    pub fn new(entries: Vec<MultiWord>) -> Self {
        let mut by_first_word: HashMap<String, Vec<MultiWord>> = HashMap::new();
        for entry in entries {
            by_first_word
                .entry(entry.words[0].clone())
                .or_default()
                .push(entry);
        }
        Self {
            by_first_word,
            ignore_spelling: false,
        }
    }

    /// Parse a list of `phrase<TAB>tag` lines. Blank lines and lines
    /// starting with `#` are skipped.
    pub fn parse(text: &str) -> std::result::Result<Self, DisambiguationInputError> {
        let mut entries = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim_end();
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let malformed = |details: String| DisambiguationInputError::MalformedMultiword {
                line: index + 1,
                details,
            };
            let (phrase, tag) = line
                .split_once('\t')
                .ok_or_else(|| malformed("expected '<phrase>\\t<tag>'".to_string()))?;
            entries.push(MultiWord::new(phrase, tag.trim()).map_err(malformed)?);
        }
        Ok(Self::new(entries))
    }

    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        Ok(Self::parse(&text)?)
    }

    pub fn from_resource(resolver: &dyn ResourceResolver, name: &str) -> Result<Self> {
        Self::from_reader(resolver.get_as_stream(name)?)
    }

    /// Mark matched tokens exempt from spell checking
    pub fn with_ignore_spelling(mut self, ignore_spelling: bool) -> Self {
        self.ignore_spelling = ignore_spelling;
        self
    }

    pub fn len(&self) -> usize {
        self.by_first_word.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_first_word.is_empty()
    }

    /// Positions of the words of `entry` starting at `start`, skipping
    /// whitespace tokens in between
    fn match_at(sentence: &AnalyzedSentence, start: usize, entry: &MultiWord) -> Option<Vec<usize>> {
        let tokens = sentence.tokens();
        let mut positions = Vec::with_capacity(entry.words.len());
        let mut position = start;
        for word in &entry.words {
            while tokens.get(position)?.is_whitespace() {
                position += 1;
            }
            if tokens[position].token() != word {
                return None;
            }
            positions.push(position);
            position += 1;
        }
        Some(positions)
    }
}

impl Disambiguator for MultiWordChunker {
    fn disambiguate(
        &self,
        mut sentence: AnalyzedSentence,
        cancel: &dyn CheckCancelled,
    ) -> Result<AnalyzedSentence> {
        for start in 0..sentence.len() {
            let token = &sentence.tokens()[start];
            if token.is_whitespace() {
                continue;
            }
            if cancel.check_cancelled() {
                break;
            }
            let Some(entries) = self.by_first_word.get(token.token()) else {
                continue;
            };

            for entry in entries {
                let Some(positions) = Self::match_at(&sentence, start, entry) else {
                    continue;
                };
                let (first, last) = (positions[0], positions[positions.len() - 1]);
                let tokens = sentence.tokens_mut();

                let open = TokenReading::new(
                    tokens[first].token(),
                    Some(PosTag::SpanOpen(entry.tag.clone())),
                    Some(entry.phrase.as_str()),
                );
                tokens[first].add_reading_from(open, MULTIWORD_CHUNKER_PROVENANCE);
                let close = TokenReading::new(
                    tokens[last].token(),
                    Some(PosTag::SpanClose(entry.tag.clone())),
                    Some(entry.phrase.as_str()),
                );
                tokens[last].add_reading_from(close, MULTIWORD_CHUNKER_PROVENANCE);

                if self.ignore_spelling {
                    for &position in &positions {
                        tokens[position].ignore_spelling();
                    }
                }
            }
        }
        Ok(sentence)
    }
}
