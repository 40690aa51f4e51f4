use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tempfile::TempDir;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use rulecore::{AnalyzedSentence, AnalyzedToken, DirectoryResolver, PosTag, TokenReading};

pub const RULES_XSD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="rules">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="unification" minOccurs="0" maxOccurs="unbounded">
          <xs:complexType>
            <xs:sequence>
              <xs:element name="equivalence" minOccurs="0" maxOccurs="unbounded">
                <xs:complexType>
                  <xs:attribute name="type" type="xs:string" use="required"/>
                </xs:complexType>
              </xs:element>
            </xs:sequence>
            <xs:attribute name="feature" type="xs:string" use="required"/>
          </xs:complexType>
        </xs:element>
        <xs:element name="category" maxOccurs="unbounded">
          <xs:complexType>
            <xs:sequence>
              <xs:element name="rule" maxOccurs="unbounded">
                <xs:complexType>
                  <xs:sequence>
                    <xs:element name="pattern" type="xs:string"/>
                  </xs:sequence>
                  <xs:attribute name="id" type="xs:ID" use="required"/>
                </xs:complexType>
              </xs:element>
            </xs:sequence>
            <xs:attribute name="name" type="xs:string" use="required"/>
          </xs:complexType>
        </xs:element>
      </xs:sequence>
      <xs:attribute name="lang" type="xs:string" use="required"/>
    </xs:complexType>
  </xs:element>
</xs:schema>"#;

pub const RULES_DTD: &str = r#"<!ELEMENT rules (category+)>
<!ATTLIST rules lang CDATA #REQUIRED>
<!ELEMENT category (rule+)>
<!ATTLIST category name CDATA #REQUIRED>
<!ELEMENT rule (pattern)>
<!ATTLIST rule id ID #REQUIRED>
<!ELEMENT pattern (#PCDATA)>
"#;

pub const SHARED_ENTITIES: &str = r#"<!ENTITY apostrophe "['’]">
<!ENTITY verb "VB.*">
"#;

/// Two unification blocks shared by every English grammar file
pub const BASE_UNIFICATIONS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rules lang="en">
  <unification feature="number">
    <equivalence type="singular"/>
    <equivalence type="plural"/>
  </unification>
  <unification feature="person">
    <equivalence type="first"/>
  </unification>
  <category name="placeholder">
    <rule id="BASE_ONLY"><pattern>x</pattern></rule>
  </category>
</rules>"#;

/// A grammar file pulling the shared entities in through a parameter entity
pub const GRAMMAR_WITH_ENTITIES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE rules [
  <!ENTITY % shared SYSTEM "../../../resource/en/entities.ent">
  %shared;
]>
<rules lang="en">
  <category name="Punctuation">
    <rule id="APOS"><pattern>&apostrophe;</pattern></rule>
    <rule id="VERB"><pattern>&verb;</pattern></rule>
  </category>
</rules>"#;

pub const PLAIN_GRAMMAR: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rules lang="en">
  <category name="Grammar">
    <rule id="A_AN"><pattern>a</pattern></rule>
    <rule id="THEIR_THERE"><pattern>their</pattern></rule>
  </category>
</rules>"#;

/// A resource tree on disk, laid out the way a rule set ships
pub struct ResourceTree {
    dir: TempDir,
}

impl ResourceTree {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    /// The default English rule set: schema, DTD, shared entities, base
    /// unifications and two grammar files
    pub fn english() -> Self {
        Self::new()
            .with_file("rules/rules.xsd", RULES_XSD)
            .with_file("rules/rules.dtd", RULES_DTD)
            .with_file("resource/en/entities.ent", SHARED_ENTITIES)
            .with_file("rules/en/base.xml", BASE_UNIFICATIONS)
            .with_file("rules/en/grammar.xml", GRAMMAR_WITH_ENTITIES)
            .with_file("rules/en/plain.xml", PLAIN_GRAMMAR)
    }

    pub fn with_file(self, name: &str, content: &str) -> Self {
        self.write(name, content);
        self
    }

    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create resource dir");
        }
        std::fs::write(&path, content).expect("Failed to write resource");
        path
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn resolver(&self) -> Arc<DirectoryResolver> {
        Arc::new(DirectoryResolver::new(self.root()))
    }
}

pub fn tagged(word: &str, tag: &str, lemma: &str) -> TokenReading {
    TokenReading::new(word, Some(PosTag::tag(tag)), Some(lemma))
}

pub fn span_open(word: &str, tag: &str, lemma: &str) -> TokenReading {
    TokenReading::new(word, Some(PosTag::SpanOpen(tag.to_string())), Some(lemma))
}

pub fn span_close(word: &str, tag: &str, lemma: &str) -> TokenReading {
    TokenReading::new(word, Some(PosTag::SpanClose(tag.to_string())), Some(lemma))
}

pub fn word(text: &str, readings: Vec<TokenReading>) -> AnalyzedToken {
    AnalyzedToken::new(text, readings)
}

/// A sentence of single-reading words separated by whitespace tokens
pub fn spaced_sentence(words: &[(&str, &str)]) -> AnalyzedSentence {
    let mut tokens = Vec::with_capacity(words.len() * 2);
    for (i, (text, tag)) in words.iter().enumerate() {
        if i > 0 {
            tokens.push(AnalyzedToken::whitespace(" "));
        }
        tokens.push(word(text, vec![tagged(text, tag, text)]));
    }
    AnalyzedSentence::new(tokens)
}

/// Counts WARN events seen by the subscriber it is layered into
#[derive(Clone, Default)]
pub struct WarningCounter {
    count: Arc<AtomicUsize>,
}

impl WarningCounter {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl<S: Subscriber> Layer<S> for WarningCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::WARN {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// A dispatcher that feeds every event into `counter`
pub fn counting_dispatch(counter: &WarningCounter) -> tracing::Dispatch {
    use tracing_subscriber::layer::SubscriberExt;
    tracing::Dispatch::new(tracing_subscriber::registry().with(counter.clone()))
}
