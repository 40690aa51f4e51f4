//! Entity-safe parsing into owned document trees.
//!
//! Documents are parsed with network access disabled, internal entities
//! substituted, no validation, and comments removed from the tree. External
//! entities go through the [`EntityPolicy`]; nothing else is followed.

use std::ffi::{CStr, CString};
use std::fmt;
use std::io::Read;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};

use libc::{c_char, c_int};

use crate::entity::EntityPolicy;
use crate::error::{Diagnostic, DiagnosticLevel, LibXml2Error, Result, RuleCoreError};
use crate::libxml2::{
    self, DtdSource, LibXml2Wrapper, ResolutionScope, XML_COMMENT_NODE, XML_ELEMENT_NODE,
    XML_PARSE_BIG_LINES, XML_PARSE_NOENT, XML_PARSE_NONET, XmlDoc, XmlNode,
};

pub(crate) const TREE_PARSE_OPTIONS: c_int = XML_PARSE_NOENT | XML_PARSE_NONET | XML_PARSE_BIG_LINES;

/// An owned libxml2 document tree.
///
/// Nodes never leave the tree that owns them: moving content between
/// documents always goes through a deep copy owned by the destination.
pub struct XmlDocument {
    ptr: NonNull<XmlDoc>,
    name: String,
}

// Safety: a document is exclusively owned; libxml2 trees carry no thread affinity
unsafe impl Send for XmlDocument {}

impl fmt::Debug for XmlDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XmlDocument")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Drop for XmlDocument {
    fn drop(&mut self) {
        unsafe { libxml2::xmlFreeDoc(self.ptr.as_ptr()) };
    }
}

impl XmlDocument {
    fn from_raw(ptr: NonNull<XmlDoc>, name: &str) -> Self {
        let doc = Self {
            ptr,
            name: name.to_string(),
        };
        doc.strip_comments();
        doc
    }

    /// Name of the source this tree was parsed from
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn as_raw(&self) -> NonNull<XmlDoc> {
        self.ptr
    }

    pub fn root(&self) -> Option<Element<'_>> {
        let root = unsafe { libxml2::xmlDocGetRootElement(self.ptr.as_ptr()) };
        NonNull::new(root).map(Element::new)
    }

    /// All elements with the given name, in document order
    /// Line of the root element, or 1 for an empty or unnumbered tree
    pub fn root_line(&self) -> u32 {
        self.root().map(|root| root.line()).filter(|&line| line > 0).unwrap_or(1)
    }

    pub fn elements_by_tag_name(&self, name: &str) -> Vec<Element<'_>> {
        fn collect<'a>(element: Element<'a>, name: &str, out: &mut Vec<Element<'a>>) {
            if element.name() == name {
                out.push(element);
            }
            for child in element.children() {
                collect(child, name, out);
            }
        }

        let mut found = Vec::new();
        if let Some(root) = self.root() {
            collect(root, name, &mut found);
        }
        found
    }

    /// Deep copy into a new, independently owned document
    pub fn try_clone(&self) -> Result<XmlDocument> {
        let copy = unsafe { libxml2::xmlCopyDoc(self.ptr.as_ptr(), 1) };
        let copy = NonNull::new(copy).ok_or(LibXml2Error::MemoryAllocation)?;
        Ok(XmlDocument {
            ptr: copy,
            name: self.name.clone(),
        })
    }

    pub fn to_xml_string(&self) -> Result<String> {
        let mut mem: *mut u8 = ptr::null_mut();
        let mut size: c_int = 0;
        unsafe {
            libxml2::xmlDocDumpMemory(self.ptr.as_ptr(), &mut mem, &mut size);
            if mem.is_null() {
                return Err(LibXml2Error::MemoryAllocation.into());
            }
            let bytes = std::slice::from_raw_parts(mem, size.max(0) as usize);
            let text = String::from_utf8_lossy(bytes).into_owned();
            libxml2::free_xml(mem as *mut libc::c_void);
            Ok(text)
        }
    }

    /// Deep-copy `source` (which may live in another document) into this
    /// tree, placing it before `anchor`, or as last child of `parent` when
    /// there is no anchor.
    pub(crate) fn insert_copy(
        &mut self,
        parent: NonNull<XmlNode>,
        anchor: Option<NonNull<XmlNode>>,
        source: Element<'_>,
    ) -> Result<()> {
        unsafe {
            let copy = libxml2::xmlDocCopyNode(source.node.as_ptr(), self.ptr.as_ptr(), 1);
            if copy.is_null() {
                return Err(LibXml2Error::NodeCopyFailed {
                    document: self.name.clone(),
                }
                .into());
            }
            let inserted = match anchor {
                Some(anchor) => libxml2::xmlAddPrevSibling(anchor.as_ptr(), copy),
                None => libxml2::xmlAddChild(parent.as_ptr(), copy),
            };
            if inserted.is_null() {
                libxml2::xmlFreeNode(copy);
                return Err(LibXml2Error::NodeCopyFailed {
                    document: self.name.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn strip_comments(&self) {
        // xmlDoc shares the leading layout of xmlNode, so its child list can
        // be walked the same way
        let mut comments = Vec::new();
        unsafe { collect_comments(self.ptr.as_ptr() as *mut XmlNode, &mut comments) };
        for comment in comments {
            unsafe {
                libxml2::xmlUnlinkNode(comment);
                libxml2::xmlFreeNode(comment);
            }
        }
    }
}

unsafe fn collect_comments(parent: *mut XmlNode, out: &mut Vec<*mut XmlNode>) {
    let mut child = unsafe { (*parent).children };
    while !child.is_null() {
        let node_type = unsafe { (*child).node_type };
        if node_type == XML_COMMENT_NODE {
            out.push(child);
        } else if node_type == XML_ELEMENT_NODE {
            unsafe { collect_comments(child, out) };
        }
        child = unsafe { (*child).next };
    }
}

/// Borrowed handle to an element inside an [`XmlDocument`]
#[derive(Clone, Copy)]
pub struct Element<'a> {
    node: NonNull<XmlNode>,
    _doc: PhantomData<&'a XmlDocument>,
}

impl fmt::Debug for Element<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("name", &self.name())
            .field("line", &self.line())
            .finish()
    }
}

impl<'a> Element<'a> {
    fn new(node: NonNull<XmlNode>) -> Self {
        Self {
            node,
            _doc: PhantomData,
        }
    }

    pub(crate) fn node(&self) -> NonNull<XmlNode> {
        self.node
    }

    pub fn name(&self) -> &'a str {
        let name = unsafe { (*self.node.as_ptr()).name };
        if name.is_null() {
            return "";
        }
        unsafe { CStr::from_ptr(name as *const c_char) }
            .to_str()
            .unwrap_or("")
    }

    pub fn attribute(&self, name: &str) -> Option<String> {
        let name = CString::new(name).ok()?;
        unsafe {
            let value = libxml2::xmlGetProp(self.node.as_ptr(), name.as_ptr() as *const u8);
            libxml2::take_xml_string(value)
        }
    }

    /// 1-based source line, 0 if unknown
    pub fn line(&self) -> u32 {
        let line = unsafe { libxml2::xmlGetLineNo(self.node.as_ptr()) };
        u32::try_from(line).unwrap_or(0)
    }

    pub fn children(&self) -> ElementChildren<'a> {
        ElementChildren {
            next: unsafe { (*self.node.as_ptr()).children },
            _doc: PhantomData,
        }
    }

    pub fn first_child(&self) -> Option<Element<'a>> {
        self.children().next()
    }

    pub fn to_xml_string(&self) -> Result<String> {
        unsafe {
            let buffer = libxml2::xmlBufferCreate();
            if buffer.is_null() {
                return Err(LibXml2Error::MemoryAllocation.into());
            }
            let doc = (*self.node.as_ptr()).doc;
            libxml2::xmlNodeDump(buffer, doc, self.node.as_ptr(), 0, 0);
            let content = libxml2::xmlBufferContent(buffer);
            let text = if content.is_null() {
                String::new()
            } else {
                CStr::from_ptr(content as *const c_char)
                    .to_string_lossy()
                    .into_owned()
            };
            libxml2::xmlBufferFree(buffer);
            Ok(text)
        }
    }
}

/// Element children of a node, skipping text and other node kinds
pub struct ElementChildren<'a> {
    next: *mut XmlNode,
    _doc: PhantomData<&'a XmlDocument>,
}

impl<'a> Iterator for ElementChildren<'a> {
    type Item = Element<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = NonNull::new(self.next) {
            self.next = unsafe { (*node.as_ptr()).next };
            if unsafe { (*node.as_ptr()).node_type } == XML_ELEMENT_NODE {
                return Some(Element::new(node));
            }
        }
        None
    }
}

/// Parses documents into trees under an [`EntityPolicy`]
#[derive(Debug, Clone)]
pub struct TreeParser {
    wrapper: LibXml2Wrapper,
    policy: EntityPolicy,
}

impl TreeParser {
    pub fn new(policy: EntityPolicy) -> Self {
        Self {
            wrapper: LibXml2Wrapper::new(),
            policy,
        }
    }

    pub fn policy(&self) -> &EntityPolicy {
        &self.policy
    }

    pub fn parse_tree<R: Read>(&self, mut stream: R, name: &str) -> Result<XmlDocument> {
        let mut data = Vec::new();
        stream.read_to_end(&mut data)?;
        self.parse_bytes(&data, name)
    }

    /// Parse a named resource obtained from the policy's resolver
    pub fn parse_resource(&self, name: &str) -> Result<XmlDocument> {
        let stream = self.policy.resolver().get_as_stream(name)?;
        self.parse_tree(stream, name)
    }

    pub fn parse_bytes(&self, data: &[u8], name: &str) -> Result<XmlDocument> {
        let (doc, diagnostics) = self.read(data, name, TREE_PARSE_OPTIONS, None)?;
        for warning in diagnostics.iter().filter(|d| d.level == DiagnosticLevel::Warning) {
            tracing::debug!("{}: {}", name, warning);
        }
        match doc {
            Some(doc) if !diagnostics.iter().any(|d| d.level >= DiagnosticLevel::Error) => Ok(doc),
            _ => Err(RuleCoreError::parse(name, first_failure(&diagnostics))),
        }
    }

    /// Raw parse used by the validator: returns the tree (if well-formed)
    /// together with every diagnostic, warnings included.
    pub(crate) fn read(
        &self,
        data: &[u8],
        name: &str,
        options: c_int,
        dtd: Option<DtdSource>,
    ) -> Result<(Option<XmlDocument>, Vec<Diagnostic>)> {
        let _scope = ResolutionScope::enter(Some(self.policy.clone()), dtd);
        let outcome = self.wrapper.read_memory(data, options)?;
        let doc = outcome.doc.map(|ptr| XmlDocument::from_raw(ptr, name));
        Ok((doc, outcome.diagnostics))
    }
}

/// The diagnostic that explains a failed parse
pub(crate) fn first_failure(diagnostics: &[Diagnostic]) -> Diagnostic {
    diagnostics
        .iter()
        .find(|d| d.level >= DiagnosticLevel::Error)
        .or_else(|| diagnostics.first())
        .cloned()
        .unwrap_or_else(|| {
            Diagnostic::new(DiagnosticLevel::Fatal, "document could not be parsed", 1, 1)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::MemoryResolver;
    use std::sync::Arc;

    fn parser() -> TreeParser {
        TreeParser::new(EntityPolicy::new(Arc::new(
            MemoryResolver::new().with_resource("en/entities.ent", "<!ENTITY verb \"VB\">"),
        )))
    }

    #[test]
    fn test_parse_navigates_elements() {
        let doc = parser()
            .parse_bytes(
                br#"<?xml version="1.0"?>
<rules lang="en">
  <unification feature="number"/>
  <rule id="R1"/>
</rules>"#,
                "grammar.xml",
            )
            .unwrap();

        let root = doc.root().unwrap();
        assert_eq!(root.name(), "rules");
        assert_eq!(root.attribute("lang").as_deref(), Some("en"));
        assert_eq!(root.attribute("missing"), None);

        let names: Vec<_> = root.children().map(|c| c.name()).collect();
        assert_eq!(names, vec!["unification", "rule"]);
        assert_eq!(root.first_child().unwrap().line(), 3);
        assert_eq!(doc.name(), "grammar.xml");
    }

    #[test]
    fn test_root_line() {
        let doc = parser()
            .parse_bytes(b"<?xml version=\"1.0\"?>\n\n<rules/>", "r.xml")
            .unwrap();
        assert_eq!(doc.root_line(), 3);
    }

    #[test]
    fn test_comments_are_dropped() {
        let doc = parser()
            .parse_bytes(b"<rules><!-- note --><rule/><!-- tail --></rules>", "c.xml")
            .unwrap();
        let xml = doc.to_xml_string().unwrap();
        assert!(!xml.contains("note"));
        assert!(!xml.contains("tail"));
        assert!(xml.contains("<rule/>"));
    }

    #[test]
    fn test_malformed_document_is_parse_error() {
        match parser().parse_bytes(b"<rules><rule></rules>", "broken.xml") {
            Err(RuleCoreError::Parse {
                source_name, line, ..
            }) => {
                assert_eq!(source_name, "broken.xml");
                assert_eq!(line, 1);
            }
            other => panic!("Expected Parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_unbound_prefix_is_parse_error() {
        match parser().parse_bytes(b"<rules>\n<x:rule/></rules>", "prefixed.xml") {
            Err(RuleCoreError::Parse {
                source_name, line, ..
            }) => {
                assert_eq!(source_name, "prefixed.xml");
                assert_eq!(line, 2);
            }
            other => panic!("Expected Parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_failure_without_diagnostics_points_at_start() {
        let failure = first_failure(&[]);
        assert_eq!(failure.level, DiagnosticLevel::Fatal);
        assert_eq!((failure.line, failure.column), (1, 1));
    }

    #[test]
    fn test_internal_entity_fragment_is_substituted() {
        let doc = parser()
            .parse_bytes(
                br#"<?xml version="1.0"?>
<!DOCTYPE rules [
  <!ENTITY % shared SYSTEM "../../en/entities.ent">
  %shared;
]>
<rules><rule tag="&verb;"/></rules>"#,
                "grammar.xml",
            )
            .unwrap();
        let rule = doc.elements_by_tag_name("rule")[0];
        assert_eq!(rule.attribute("tag").as_deref(), Some("VB"));
    }

    #[test]
    fn test_clone_is_independent() {
        let doc = parser()
            .parse_bytes(b"<rules><rule/></rules>", "a.xml")
            .unwrap();
        let copy = doc.try_clone().unwrap();
        drop(doc);
        assert_eq!(copy.elements_by_tag_name("rule").len(), 1);
    }

    #[test]
    fn test_element_serialization() {
        let doc = parser()
            .parse_bytes(b"<rules><rule id=\"X\"><pattern/></rule></rules>", "s.xml")
            .unwrap();
        let rule = doc.elements_by_tag_name("rule")[0];
        assert_eq!(rule.to_xml_string().unwrap(), "<rule id=\"X\"><pattern/></rule>");
    }
}
