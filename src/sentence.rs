//! Analyzed sentences: tokens, their candidate readings and POS tags.
//!
//! Span markers are parsed into [`PosTag::SpanOpen`] / [`PosTag::SpanClose`]
//! where tags enter the crate; the bracketed text form only reappears when
//! a tag is displayed.

use std::fmt;
use std::str::FromStr;

use crate::error::DisambiguationInputError;

/// A part-of-speech tag, or a multiword span marker
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PosTag {
    Tag(String),
    /// `<NAME>`
    SpanOpen(String),
    /// `</NAME>`
    SpanClose(String),
}

impl PosTag {
    pub fn tag(name: impl Into<String>) -> Self {
        PosTag::Tag(name.into())
    }

    /// Parse the textual form, recognising bracketed span markers
    pub fn parse(raw: &str) -> Result<Self, DisambiguationInputError> {
        let unnamed = || DisambiguationInputError::UnnamedSpanMarker {
            marker: raw.to_string(),
        };
        if let Some(inner) = raw.strip_prefix("</").and_then(|r| r.strip_suffix('>')) {
            if inner.is_empty() {
                return Err(unnamed());
            }
            return Ok(PosTag::SpanClose(inner.to_string()));
        }
        if let Some(inner) = raw.strip_prefix('<').and_then(|r| r.strip_suffix('>')) {
            if inner.is_empty() {
                return Err(unnamed());
            }
            return Ok(PosTag::SpanOpen(inner.to_string()));
        }
        Ok(PosTag::Tag(raw.to_string()))
    }

    /// The tag name without any marker brackets
    pub fn name(&self) -> &str {
        match self {
            PosTag::Tag(name) | PosTag::SpanOpen(name) | PosTag::SpanClose(name) => name,
        }
    }

    pub fn is_span_open(&self) -> bool {
        matches!(self, PosTag::SpanOpen(_))
    }

    pub fn is_span_close(&self) -> bool {
        matches!(self, PosTag::SpanClose(_))
    }

    /// The close marker matching an open marker
    pub fn closing(&self) -> Option<PosTag> {
        match self {
            PosTag::SpanOpen(name) => Some(PosTag::SpanClose(name.clone())),
            _ => None,
        }
    }
}

impl FromStr for PosTag {
    type Err = DisambiguationInputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PosTag::parse(s)
    }
}

impl fmt::Display for PosTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PosTag::Tag(name) => write!(f, "{}", name),
            PosTag::SpanOpen(name) => write!(f, "<{}>", name),
            PosTag::SpanClose(name) => write!(f, "</{}>", name),
        }
    }
}

/// One candidate interpretation of a token
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenReading {
    token: String,
    pos_tag: Option<PosTag>,
    lemma: Option<String>,
}

impl TokenReading {
    pub fn new(token: impl Into<String>, pos_tag: Option<PosTag>, lemma: Option<&str>) -> Self {
        Self {
            token: token.into(),
            pos_tag,
            lemma: lemma.map(str::to_string),
        }
    }

    /// Reading with a tag in textual form, as taggers and rule files write it
    pub fn parsed(
        token: impl Into<String>,
        pos_tag: Option<&str>,
        lemma: Option<&str>,
    ) -> Result<Self, DisambiguationInputError> {
        let pos_tag = pos_tag.map(PosTag::parse).transpose()?;
        Ok(Self::new(token, pos_tag, lemma))
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn pos_tag(&self) -> Option<&PosTag> {
        self.pos_tag.as_ref()
    }

    pub fn lemma(&self) -> Option<&str> {
        self.lemma.as_deref()
    }

    pub fn has_tag_and_lemma(&self, tag: &PosTag, lemma: Option<&str>) -> bool {
        self.pos_tag.as_ref() == Some(tag) && self.lemma.as_deref() == lemma
    }
}

impl fmt::Display for TokenReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/", self.lemma.as_deref().unwrap_or(""))?;
        match &self.pos_tag {
            Some(tag) => write!(f, "{}", tag),
            None => write!(f, "null"),
        }
    }
}

/// A token position with its (non-empty, ordered, duplicate-free) readings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzedToken {
    token: String,
    readings: Vec<TokenReading>,
    whitespace: bool,
    ignore_spelling: bool,
    provenance: Option<String>,
}

impl AnalyzedToken {
    /// A word token. With no readings it keeps a single untagged one.
    pub fn new(token: impl Into<String>, readings: Vec<TokenReading>) -> Self {
        let token = token.into();
        let mut analyzed = Self {
            readings: Vec::with_capacity(readings.len().max(1)),
            token,
            whitespace: false,
            ignore_spelling: false,
            provenance: None,
        };
        for reading in readings {
            analyzed.add_reading(reading);
        }
        if analyzed.readings.is_empty() {
            analyzed.readings.push(TokenReading::new(analyzed.token.clone(), None, None));
        }
        analyzed
    }

    pub fn whitespace(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            readings: vec![TokenReading::new(text.clone(), None, None)],
            token: text,
            whitespace: true,
            ignore_spelling: false,
            provenance: None,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn readings(&self) -> &[TokenReading] {
        &self.readings
    }

    pub fn is_whitespace(&self) -> bool {
        self.whitespace
    }

    pub fn is_ignored_by_speller(&self) -> bool {
        self.ignore_spelling
    }

    pub fn ignore_spelling(&mut self) {
        self.ignore_spelling = true;
    }

    /// Label of the pipeline stage that last rewrote this token
    pub fn provenance(&self) -> Option<&str> {
        self.provenance.as_deref()
    }

    pub fn has_tag_and_lemma(&self, tag: &PosTag, lemma: Option<&str>) -> bool {
        self.readings.iter().any(|r| r.has_tag_and_lemma(tag, lemma))
    }

    pub fn has_pos_tag(&self, tag: &PosTag) -> bool {
        self.readings.iter().any(|r| r.pos_tag() == Some(tag))
    }

    /// Add a reading unless an identical one is already present
    pub fn add_reading(&mut self, reading: TokenReading) -> bool {
        if self.readings.contains(&reading) {
            return false;
        }
        self.readings.push(reading);
        true
    }

    pub(crate) fn add_reading_from(&mut self, reading: TokenReading, provenance: &str) {
        if self.add_reading(reading) {
            self.provenance = Some(provenance.to_string());
        }
    }

    pub(crate) fn replace_readings_unchecked(&mut self, reading: TokenReading, provenance: &str) {
        self.readings = vec![reading];
        self.provenance = Some(provenance.to_string());
    }
}

impl fmt::Display for AnalyzedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.token)?;
        for (i, reading) in self.readings.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", reading)?;
        }
        write!(f, "]")
    }
}

/// An ordered token sequence whose length never changes once built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzedSentence {
    tokens: Vec<AnalyzedToken>,
}

impl AnalyzedSentence {
    pub fn new(tokens: Vec<AnalyzedToken>) -> Self {
        Self { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[AnalyzedToken] {
        &self.tokens
    }

    /// Mutable access to the tokens; the slice cannot grow or shrink
    pub fn tokens_mut(&mut self) -> &mut [AnalyzedToken] {
        &mut self.tokens
    }

    pub fn token(&self, position: usize) -> Option<&AnalyzedToken> {
        self.tokens.get(position)
    }

    /// Replace the readings at `position`, tagging the token with the stage
    /// that did it. An empty reading set is rejected.
    pub fn set_readings(
        &mut self,
        position: usize,
        readings: Vec<TokenReading>,
        provenance: &str,
    ) -> Result<(), DisambiguationInputError> {
        let Some(token) = self.tokens.get_mut(position) else {
            return Err(DisambiguationInputError::NoReadings {
                token: String::new(),
                position,
            });
        };
        if readings.is_empty() {
            return Err(DisambiguationInputError::NoReadings {
                token: token.token.clone(),
                position,
            });
        }
        token.readings.clear();
        for reading in readings {
            token.add_reading(reading);
        }
        token.provenance = Some(provenance.to_string());
        Ok(())
    }
}

impl fmt::Display for AnalyzedSentence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for token in self.tokens.iter().filter(|t| !t.is_whitespace()) {
            write!(f, "{} ", token)?;
        }
        Ok(())
    }
}
