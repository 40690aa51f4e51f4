//! Multiword span propagation.
//!
//! Walks the sentence once. A token carrying a span-open reading whose
//! matching close (same name, same lemma) appears later starts a span; the
//! open token and every non-whitespace token up to and including the close
//! are rewritten to the single unwrapped reading. Among several open
//! readings on one token the one with the nearest close wins; ties keep the
//! first. Unterminated spans are dropped at the end of the sentence.

use super::{CheckCancelled, Disambiguator};
use crate::error::Result;
use crate::sentence::{AnalyzedSentence, AnalyzedToken, PosTag, TokenReading};

#[derive(Debug, Clone, PartialEq, Eq)]
enum SpanState {
    Idle,
    InSpan { tag: String, lemma: Option<String> },
}

#[derive(Debug, Clone)]
pub struct SpanPropagator {
    provenance: String,
}

impl SpanPropagator {
    pub fn new(provenance: impl Into<String>) -> Self {
        Self {
            provenance: provenance.into(),
        }
    }

    pub fn provenance(&self) -> &str {
        &self.provenance
    }

    /// Rewrite spans in place, stopping at the first positive cancellation
    /// check. Tokens not yet visited are left as they were.
    pub fn propagate(&self, sentence: &mut AnalyzedSentence, cancel: &dyn CheckCancelled) {
        let mut state = SpanState::Idle;
        let tokens = sentence.tokens_mut();

        for position in 0..tokens.len() {
            if tokens[position].is_whitespace() {
                continue;
            }
            if cancel.check_cancelled() {
                break;
            }

            state = match state {
                SpanState::Idle => match nearest_span_open(tokens, position) {
                    Some((tag, lemma)) => {
                        let token = &mut tokens[position];
                        let reading = TokenReading::new(
                            token.token(),
                            Some(PosTag::Tag(tag.clone())),
                            lemma.as_deref(),
                        );
                        token.replace_readings_unchecked(reading, &self.provenance);
                        SpanState::InSpan { tag, lemma }
                    }
                    None => SpanState::Idle,
                },
                SpanState::InSpan { tag, lemma } => {
                    let token = &mut tokens[position];
                    let closes =
                        token.has_tag_and_lemma(&PosTag::SpanClose(tag.clone()), lemma.as_deref());
                    let reading = TokenReading::new(
                        token.token(),
                        Some(PosTag::Tag(tag.clone())),
                        lemma.as_deref(),
                    );
                    token.replace_readings_unchecked(reading, &self.provenance);
                    token.ignore_spelling();
                    if closes {
                        SpanState::Idle
                    } else {
                        SpanState::InSpan { tag, lemma }
                    }
                }
            };
        }
    }
}

impl Default for SpanPropagator {
    fn default() -> Self {
        Self::new(super::HYBRID_PROVENANCE)
    }
}

impl Disambiguator for SpanPropagator {
    fn disambiguate(
        &self,
        mut sentence: AnalyzedSentence,
        cancel: &dyn CheckCancelled,
    ) -> Result<AnalyzedSentence> {
        self.propagate(&mut sentence, cancel);
        Ok(sentence)
    }
}

/// The span-open reading at `position` whose matching close is nearest,
/// as (unwrapped tag, lemma). Readings with no close later in the sentence
/// are not selectable.
fn nearest_span_open(tokens: &[AnalyzedToken], position: usize) -> Option<(String, Option<String>)> {
    let mut best: Option<(usize, &TokenReading)> = None;

    for reading in tokens[position].readings() {
        let Some(close) = reading.pos_tag().and_then(PosTag::closing) else {
            continue;
        };
        let distance = tokens[position + 1..]
            .iter()
            .position(|token| token.has_tag_and_lemma(&close, reading.lemma()))
            .map(|offset| offset + 1);

        if let Some(distance) = distance {
            if best.is_none_or(|(best_distance, _)| distance < best_distance) {
                best = Some((distance, reading));
            }
        }
    }

    best.map(|(_, reading)| {
        let tag = reading.pos_tag().map(|t| t.name().to_string()).unwrap_or_default();
        (tag, reading.lemma().map(str::to_string))
    })
}
