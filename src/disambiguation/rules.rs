//! Rule-driven contextual disambiguation.
//!
//! Rules come from a validated (and possibly merged) rules document. How a
//! rule's pattern is evaluated against a sentence is up to the supplied
//! [`RuleMatcher`]; this stage only sequences the rules and polls for
//! cancellation between them.

use std::sync::Arc;

use super::{CheckCancelled, Disambiguator};
use crate::document::{Element, XmlDocument};
use crate::error::{Diagnostic, DiagnosticLevel, DisambiguationInputError, Result, RuleCoreError};
use crate::merger::RULES_ELEMENT;
use crate::sentence::AnalyzedSentence;
use crate::validator::XmlValidator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Rule,
    RuleGroup,
}

/// One `rule` or `rulegroup` element, detached from its document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisambiguationRule {
    pub kind: RuleKind,
    pub id: Option<String>,
    pub name: Option<String>,
    /// The element serialized back to XML
    pub xml: String,
    pub line: u32,
}

impl DisambiguationRule {
    fn from_element(kind: RuleKind, element: Element<'_>) -> Result<Self> {
        Ok(Self {
            kind,
            id: element.attribute("id"),
            name: element.attribute("name"),
            xml: element.to_xml_string()?,
            line: element.line(),
        })
    }

    /// Id when present, otherwise a position-based label
    pub fn label(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => format!("<unnamed rule at line {}>", self.line),
        }
    }
}

/// Rules of one document in document order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    source: String,
    rules: Vec<DisambiguationRule>,
}

impl RuleSet {
    /// Collect top-level `rule` and `rulegroup` elements. Rules nested in a
    /// group stay part of the group.
    pub fn from_document(doc: &XmlDocument) -> Result<Self> {
        fn collect(element: Element<'_>, out: &mut Vec<DisambiguationRule>) -> Result<()> {
            for child in element.children() {
                match child.name() {
                    "rule" => out.push(DisambiguationRule::from_element(RuleKind::Rule, child)?),
                    "rulegroup" => {
                        out.push(DisambiguationRule::from_element(RuleKind::RuleGroup, child)?)
                    }
                    _ => collect(child, out)?,
                }
            }
            Ok(())
        }

        let root = doc
            .root()
            .filter(|root| root.name() == RULES_ELEMENT)
            .ok_or_else(|| {
                RuleCoreError::parse(
                    doc.name(),
                    Diagnostic::new(
                        DiagnosticLevel::Error,
                        format!("expected a <{}> root element", RULES_ELEMENT),
                        doc.root_line(),
                        1,
                    ),
                )
            })?;

        let mut rules = Vec::new();
        collect(root, &mut rules)?;
        Ok(Self {
            source: doc.name().to_string(),
            rules,
        })
    }

    /// Validate a rules resource against `xsd_path` and collect its rules
    pub fn load(validator: &XmlValidator, name: &str, xsd_path: &str) -> Result<Self> {
        validator.validate_with_xml_schema(name, xsd_path)?;
        let doc = validator.parser().parse_resource(name)?;
        Self::from_document(&doc)
    }

    /// Like [`RuleSet::load`], with the unification blocks of `base_name`
    /// merged in first
    pub fn load_merged(
        validator: &XmlValidator,
        base_name: &str,
        name: &str,
        xsd_path: &str,
    ) -> Result<Self> {
        let doc = validator.load_merged(base_name, name, xsd_path)?;
        Self::from_document(&doc)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DisambiguationRule> {
        self.rules.iter()
    }
}

/// Evaluates one rule against a sentence, reducing readings in place
#[cfg_attr(test, mockall::automock)]
pub trait RuleMatcher: Send + Sync {
    fn apply(
        &self,
        rule: &DisambiguationRule,
        sentence: &mut AnalyzedSentence,
    ) -> std::result::Result<(), DisambiguationInputError>;
}

pub struct XmlRuleDisambiguator {
    rules: Arc<RuleSet>,
    matcher: Arc<dyn RuleMatcher>,
}

impl XmlRuleDisambiguator {
    pub fn new(rules: Arc<RuleSet>, matcher: Arc<dyn RuleMatcher>) -> Self {
        Self { rules, matcher }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }
}

impl std::fmt::Debug for XmlRuleDisambiguator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmlRuleDisambiguator")
            .field("source", &self.rules.source())
            .field("rules", &self.rules.len())
            .finish_non_exhaustive()
    }
}

impl Disambiguator for XmlRuleDisambiguator {
    fn disambiguate(
        &self,
        mut sentence: AnalyzedSentence,
        cancel: &dyn CheckCancelled,
    ) -> Result<AnalyzedSentence> {
        for rule in self.rules.iter() {
            if cancel.check_cancelled() {
                tracing::debug!("Disambiguation cancelled before rule {}", rule.label());
                break;
            }
            self.matcher.apply(rule, &mut sentence)?;
        }
        Ok(sentence)
    }
}
