//! Rule document validation against DTDs and XML Schemas.
//!
//! Both modes are fail-fast: the first diagnostic libxml2 raises, warning or
//! error, becomes the [`RuleCoreError::Validation`] returned to the caller.
//! There is no best-effort mode and no continuation past the first problem.
//!
//! Compiled schemas are kept in a bounded in-memory cache keyed by schema
//! resource name. Compilation itself is serialized by the libxml2 layer.

use std::sync::{Arc, OnceLock};

use libc::c_int;
use moka::sync::Cache;
use regex::Regex;

use crate::config::Config;
use crate::document::{TreeParser, XmlDocument, first_failure};
use crate::entity::EntityPolicy;
use crate::error::{Diagnostic, DiagnosticLevel, Result, RuleCoreError};
use crate::libxml2::{
    DtdSource, LibXml2Wrapper, ResolutionScope, XML_PARSE_BIG_LINES, XML_PARSE_DTDLOAD, XML_PARSE_NOENT,
    XML_PARSE_NONET, XmlSchemaPtr,
};
use crate::merger;
use crate::resource::{DirectoryResolver, ResourceResolver};

pub const DEFAULT_DTD_PUBLIC_ID: &str = "-//W3C//DTD Rules 0.1//EN";
pub const DEFAULT_SCHEMA_CACHE_CAPACITY: u64 = 64;

/// Name reported for documents validated straight from a string
pub const INLINE_SOURCE_NAME: &str = "<string>";

const XML_DECLARATION: &str = "<?xml version=\"1.0\"";
const XML_DECLARATION_END: &str = "?>";
const SCHEMA_SUFFIX: &str = ".xsd";

const DTD_PARSE_OPTIONS: c_int =
    XML_PARSE_NOENT | XML_PARSE_DTDLOAD | XML_PARSE_NONET | XML_PARSE_BIG_LINES;
const SCHEMA_PARSE_OPTIONS: c_int = XML_PARSE_NOENT | XML_PARSE_NONET | XML_PARSE_BIG_LINES;

/// Cached regex for removing existing DOCTYPE declarations
static DOCTYPE_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_doctype_regex() -> &'static Regex {
    DOCTYPE_REGEX
        .get_or_init(|| Regex::new(r"<!DOCTYPE.+>").expect("Failed to compile DOCTYPE regex"))
}

/// Serves schema includes relative to the directory of the including schema,
/// falling back to the resource root.
struct SchemaIncludeResolver {
    inner: Arc<dyn ResourceResolver>,
    base: String,
}

impl SchemaIncludeResolver {
    fn new(inner: Arc<dyn ResourceResolver>, schema_path: &str) -> Self {
        let base = schema_path
            .trim_start_matches('/')
            .rsplit_once('/')
            .map(|(dir, _)| dir.to_string())
            .unwrap_or_default();
        Self { inner, base }
    }

    fn candidates(&self, name: &str) -> Vec<String> {
        if self.base.is_empty() {
            vec![name.to_string()]
        } else {
            vec![format!("{}/{}", self.base, name), name.to_string()]
        }
    }
}

impl ResourceResolver for SchemaIncludeResolver {
    fn get_as_stream(&self, name: &str) -> Result<Box<dyn std::io::Read + Send>> {
        self.candidates(name)
            .iter()
            .find_map(|candidate| self.inner.get_as_stream(candidate).ok())
            .ok_or_else(|| RuleCoreError::not_found(name))
    }

    fn get_as_location(&self, name: &str) -> Result<String> {
        self.candidates(name)
            .iter()
            .find_map(|candidate| self.inner.get_as_location(candidate).ok())
            .ok_or_else(|| RuleCoreError::not_found(name))
    }
}

/// Validates rule documents served by a [`ResourceResolver`]
pub struct XmlValidator {
    resolver: Arc<dyn ResourceResolver>,
    parser: TreeParser,
    schemas: Cache<String, Arc<XmlSchemaPtr>>,
    dtd_public_id: String,
    wrapper: LibXml2Wrapper,
}

impl XmlValidator {
    pub fn new(resolver: Arc<dyn ResourceResolver>) -> Self {
        let policy = EntityPolicy::new(Arc::clone(&resolver));
        Self::with_policy(policy, DEFAULT_SCHEMA_CACHE_CAPACITY)
    }

    /// Validator sharing the resolver and entity suffix of `policy`
    pub fn with_policy(policy: EntityPolicy, schema_cache_capacity: u64) -> Self {
        Self {
            resolver: Arc::clone(policy.resolver()),
            parser: TreeParser::new(policy),
            schemas: Cache::builder().max_capacity(schema_cache_capacity).build(),
            dtd_public_id: DEFAULT_DTD_PUBLIC_ID.to_string(),
            wrapper: LibXml2Wrapper::new(),
        }
    }

    /// Validator over the configured resource directory
    pub fn from_config(config: &Config) -> Result<Self> {
        let root = config.resources.root.as_ref().ok_or_else(|| {
            RuleCoreError::Config("resources.root must be set to build a validator".to_string())
        })?;
        let resolver: Arc<dyn ResourceResolver> = Arc::new(DirectoryResolver::new(root));
        let policy = EntityPolicy::new(resolver).with_suffix(&config.resources.entity_suffix);
        Ok(Self::with_policy(policy, config.validation.schema_cache_capacity)
            .with_dtd_public_id(&config.validation.dtd_public_id))
    }

    pub fn with_dtd_public_id(mut self, public_id: &str) -> Self {
        self.dtd_public_id = public_id.to_string();
        self
    }

    /// The entity-safe parser this validator reads documents with
    pub fn parser(&self) -> &TreeParser {
        &self.parser
    }

    /// Validate XML text against a DTD resource, replacing any DOCTYPE the
    /// text declares with one naming `doc_type` as root.
    pub fn validate_xml_string(&self, xml: &str, dtd_path: &str, doc_type: &str) -> Result<()> {
        self.validate_with_doctype(xml, dtd_path, doc_type, INLINE_SOURCE_NAME)
    }

    pub fn validate_with_dtd(&self, name: &str, dtd_path: &str, doc_type: &str) -> Result<()> {
        let data = self.resolver.read_bytes(name)?;
        let xml = String::from_utf8_lossy(&data);
        self.validate_with_doctype(&xml, dtd_path, doc_type, name)
    }

    pub fn validate_with_xml_schema(&self, name: &str, xsd_path: &str) -> Result<()> {
        let data = self.resolver.read_bytes(name)?;
        self.validate_bytes(&data, name, xsd_path).map(drop)
    }

    /// Merge the unification blocks of `base_name` into `name` and validate
    /// the merged document. Reported lines refer to the merged text.
    pub fn validate_merged_with_xml_schema(
        &self,
        base_name: &str,
        name: &str,
        xsd_path: &str,
    ) -> Result<()> {
        self.load_merged(base_name, name, xsd_path).map(drop)
    }

    /// The validated merged document, ready for rule loading
    pub fn load_merged(&self, base_name: &str, name: &str, xsd_path: &str) -> Result<XmlDocument> {
        let base = self.parser.parse_resource(base_name)?;
        let target = self.parser.parse_resource(name)?;
        let merged = merger::merge(&base, &target)?;
        let text = merged.to_xml_string()?;
        self.validate_bytes(text.as_bytes(), name, xsd_path)
    }

    pub fn validate_string_with_xml_schema(
        &self,
        xml: &str,
        xsd_path: &str,
        xml_path: &str,
    ) -> Result<()> {
        self.validate_bytes(xml.as_bytes(), xml_path, xsd_path).map(drop)
    }

    /// Validate an already parsed tree
    pub fn validate_document(&self, doc: &XmlDocument, xsd_path: &str) -> Result<()> {
        let schema = self.schema(xsd_path)?;
        self.check_against(doc, &schema, xsd_path)
    }

    /// Number of compiled schemas currently cached
    pub fn cached_schema_count(&self) -> u64 {
        self.schemas.run_pending_tasks();
        self.schemas.entry_count()
    }

    fn check_against(&self, doc: &XmlDocument, schema: &XmlSchemaPtr, xsd_path: &str) -> Result<()> {
        let (code, diagnostics) = self.wrapper.validate_doc(schema, doc.as_raw())?;
        fail_fast(doc.name(), diagnostics)?;
        if code != 0 {
            let message = format!("document rejected by {} (libxml2 code {})", xsd_path, code);
            return Err(RuleCoreError::validation(
                doc.name(),
                Diagnostic::new(DiagnosticLevel::Error, message, doc.root_line(), 1),
            ));
        }
        Ok(())
    }

    fn validate_bytes(&self, data: &[u8], name: &str, xsd_path: &str) -> Result<XmlDocument> {
        let schema = self.schema(xsd_path)?;

        let (doc, diagnostics) = self.parser.read(data, name, SCHEMA_PARSE_OPTIONS, None)?;
        fail_fast(name, diagnostics.clone())?;
        let doc = doc.ok_or_else(|| RuleCoreError::validation(name, first_failure(&diagnostics)))?;
        self.check_against(&doc, &schema, xsd_path)?;
        Ok(doc)
    }

    fn validate_with_doctype(
        &self,
        xml: &str,
        dtd_path: &str,
        doc_type: &str,
        name: &str,
    ) -> Result<()> {
        let location = self.resolver.get_as_location(dtd_path)?;
        let dtd_data = self.resolver.read_bytes(dtd_path)?;
        let text = self
            .insert_doctype(xml, doc_type, &location)
            .map_err(|diagnostic| RuleCoreError::validation(name, diagnostic))?;

        let dtd = DtdSource {
            location,
            data: dtd_data,
        };
        let (doc, diagnostics) = self.parser.read(text.as_bytes(), name, DTD_PARSE_OPTIONS, Some(dtd))?;
        fail_fast(name, diagnostics.clone())?;
        let doc = doc.ok_or_else(|| RuleCoreError::validation(name, first_failure(&diagnostics)))?;

        let (valid, diagnostics) = self.wrapper.validate_dtd(doc.as_raw())?;
        fail_fast(name, diagnostics)?;
        if !valid {
            return Err(RuleCoreError::validation(
                name,
                Diagnostic::new(
                    DiagnosticLevel::Error,
                    "document is not valid against its DTD",
                    doc.root_line(),
                    1,
                ),
            ));
        }
        Ok(())
    }

    /// Strip existing DOCTYPE declarations and insert the canonical one right
    /// after the XML declaration.
    fn insert_doctype(
        &self,
        xml: &str,
        doc_type: &str,
        dtd_location: &str,
    ) -> std::result::Result<String, Diagnostic> {
        let clean = get_doctype_regex().replace_all(xml, "");
        let end = clean.find(XML_DECLARATION).and_then(|start| {
            clean[start..]
                .find(XML_DECLARATION_END)
                .map(|offset| start + offset + XML_DECLARATION_END.len())
        });
        let Some(end) = end else {
            let preview: String = clean.chars().take(100).collect();
            return Err(Diagnostic::new(
                DiagnosticLevel::Fatal,
                format!("No XML declaration found in '{}...'", preview),
                1,
                1,
            ));
        };
        Ok(format!(
            "{}\r\n<!DOCTYPE {} PUBLIC \"{}\" \"{}\">{}",
            &clean[..end],
            doc_type,
            self.dtd_public_id,
            dtd_location,
            &clean[end..]
        ))
    }

    fn schema(&self, xsd_path: &str) -> Result<Arc<XmlSchemaPtr>> {
        let key = xsd_path.trim_start_matches('/').to_string();
        self.schemas
            .try_get_with(key, || self.compile_schema(xsd_path))
            .map_err(shared_error)
    }

    fn compile_schema(&self, xsd_path: &str) -> Result<Arc<XmlSchemaPtr>> {
        let data = self.resolver.read_bytes(xsd_path)?;
        let includes = EntityPolicy::new(Arc::new(SchemaIncludeResolver::new(
            Arc::clone(&self.resolver),
            xsd_path,
        )))
        .with_suffix(SCHEMA_SUFFIX);

        let _scope = ResolutionScope::enter(Some(includes), None);
        let schema = self.wrapper.parse_schema_from_memory(&data).map_err(|e| {
            RuleCoreError::Parse {
                source_name: xsd_path.to_string(),
                message: e.to_string(),
                line: 0,
                column: 0,
            }
        })?;
        tracing::debug!("Compiled schema {}", xsd_path);
        Ok(Arc::new(schema))
    }
}

impl std::fmt::Debug for XmlValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmlValidator")
            .field("parser", &self.parser)
            .field("dtd_public_id", &self.dtd_public_id)
            .finish_non_exhaustive()
    }
}

/// Turn the first diagnostic, whatever its level, into the validation error
fn fail_fast(name: &str, diagnostics: Vec<Diagnostic>) -> Result<()> {
    match diagnostics.into_iter().next() {
        Some(first) => {
            tracing::debug!("{}: {}", name, first);
            Err(RuleCoreError::validation(name, first))
        }
        None => Ok(()),
    }
}

/// Recover an owned error from one shared by concurrent cache loaders
fn shared_error(err: Arc<RuleCoreError>) -> RuleCoreError {
    match Arc::try_unwrap(err) {
        Ok(err) => err,
        Err(shared) => match &*shared {
            RuleCoreError::ResourceNotFound { name } => RuleCoreError::not_found(name),
            RuleCoreError::Parse {
                source_name,
                message,
                line,
                column,
            } => RuleCoreError::Parse {
                source_name: source_name.clone(),
                message: message.clone(),
                line: *line,
                column: *column,
            },
            other => RuleCoreError::LibXml2Internal {
                details: other.to_string(),
            },
        },
    }
}
