//! # rulecore Library
//!
//! Rule ingestion and sentence disambiguation core for a grammar checker:
//! entity-safe parsing of rule documents, merging of shared `unification`
//! blocks, fail-fast DTD/XSD validation, per-language n-gram model
//! lifecycle, and a multiword-aware disambiguation pipeline.

pub mod config;
pub mod disambiguation;
pub mod document;
pub mod entity;
pub mod error;
pub mod language_model;
pub mod libxml2;
pub mod merger;
pub mod resource;
pub mod sentence;
pub mod validator;

pub use config::{
    Config, ConfigError, ConfigManager, DisambiguationConfig, EnvProvider, LanguageModelConfig,
    ResourceConfig, SystemEnvProvider, ValidationConfig,
};
pub use disambiguation::{
    CheckCancelled, DisambiguationRule, Disambiguator, HybridDisambiguator, MultiWord,
    MultiWordChunker, NotCancelled, RuleKind, RuleMatcher, RuleSet, SpanPropagator,
    XmlRuleDisambiguator,
};
pub use document::{Element, TreeParser, XmlDocument};
pub use entity::EntityPolicy;
pub use error::{Diagnostic, DiagnosticLevel, DisambiguationInputError, Result, RuleCoreError};
pub use language_model::{LanguageModel, LanguageModelProvider, ModelLoader, OneShotFlag};
pub use libxml2::{LibXml2Wrapper, XmlSchemaPtr};
pub use merger::merge;
pub use resource::{DirectoryResolver, MemoryResolver, ResourceResolver};
pub use sentence::{AnalyzedSentence, AnalyzedToken, PosTag, TokenReading};
pub use validator::XmlValidator;
