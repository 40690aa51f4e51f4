//! Inject shared `unification` definitions into a rule document.

use crate::document::XmlDocument;
use crate::error::{Result, RuleCoreError};

pub const RULES_ELEMENT: &str = "rules";
pub const UNIFICATION_ELEMENT: &str = "unification";

/// Build a new document holding `target` with every `unification` element
/// of `base` deep-copied in, in base order.
///
/// The copies go directly under the target's `rules` root, before its first
/// child element whatever its name (appended when the root is empty). A
/// target with any other root is rejected even when `base` has nothing to
/// contribute. Neither input is modified.
pub fn merge(base: &XmlDocument, target: &XmlDocument) -> Result<XmlDocument> {
    let mut merged = target.try_clone()?;
    let (rules, anchor) = {
        let root = merged.root().filter(|root| root.name() == RULES_ELEMENT).ok_or_else(|| {
            RuleCoreError::Merge {
                target: target.name().to_string(),
                details: format!("document has no <{}> root element", RULES_ELEMENT),
            }
        })?;
        (root.node(), root.first_child().map(|child| child.node()))
    };

    let unifications = base.elements_by_tag_name(UNIFICATION_ELEMENT);
    if unifications.is_empty() {
        return Ok(merged);
    }

    for unification in &unifications {
        merged.insert_copy(rules, anchor, *unification)?;
    }

    tracing::debug!(
        "Merged {} unification element(s) from {} into {}",
        unifications.len(),
        base.name(),
        target.name()
    );
    Ok(merged)
}
