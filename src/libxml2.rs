//! LibXML2 FFI layer
//!
//! Direct libxml2 bindings for everything rule ingestion needs: document
//! parsing, tree copying, DTD validation, XML Schema validation and the
//! external-entity loader hook.
//!
//! ## Why libxml2
//!
//! The Rust XML ecosystem has fast parsers (quick-xml, roxmltree) but no
//! DTD or XSD validation. Rule documents are validated against both, and
//! diagnostics must carry the line and column of the first problem, so the
//! validator and the tree parser share one libxml2 instance.
//!
//! ## Entity resolution
//!
//! libxml2 has a single process-wide external entity loader. It is replaced
//! exactly once with [`rule_entity_loader`], which consults the
//! [`ResolutionScope`] active on the calling thread. Outside a scope every
//! external reference is refused, so nothing in this crate can make libxml2
//! read arbitrary files or URLs.
//!
//! ## Thread Safety Strategy
//!
//! - **Initialization**: guarded by `std::sync::Once` (libxml2 init is not thread-safe)
//! - **Schema parsing**: serialized through [`SCHEMA_PARSE_LOCK`]
//! - **Document parsing / validation**: parallel, each call owns its contexts
//! - **Error capture**: libxml2 keeps the structured error handler per thread,
//!   so each capture only sees diagnostics raised by its own thread
//! - **Schema sharing**: Arc-wrapped pointers allow safe concurrent validation

use std::cell::RefCell;
use std::ffi::CStr;
use std::marker::PhantomData;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr::{self, NonNull};
use std::sync::{Arc, Once};

use libc::{c_char, c_int, c_long, c_ushort, c_void};
use parking_lot::Mutex;

use crate::entity::EntityPolicy;
use crate::error::{Diagnostic, DiagnosticLevel, LibXml2Error, LibXml2Result};

/// Global initialization flag for libxml2
static LIBXML2_INIT: Once = Once::new();

/// libxml2's schema parser is not thread-safe
static SCHEMA_PARSE_LOCK: Mutex<()> = Mutex::new(());

pub(crate) const XML_PARSE_NOENT: c_int = 1 << 1;
pub(crate) const XML_PARSE_DTDLOAD: c_int = 1 << 2;
pub(crate) const XML_PARSE_NONET: c_int = 1 << 11;
pub(crate) const XML_PARSE_BIG_LINES: c_int = 1 << 22;

pub(crate) const XML_ELEMENT_NODE: c_int = 1;
pub(crate) const XML_COMMENT_NODE: c_int = 8;

const XML_ERR_WARNING: c_int = 1;
const XML_ERR_ERROR: c_int = 2;
const XML_ERR_FATAL: c_int = 3;
const XML_FROM_IO: c_int = 8;

const XML_CHAR_ENCODING_NONE: c_int = 0;

/// ## Opaque libxml2 structures
#[repr(C)]
pub struct XmlDoc {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlParserCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlParserInput {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlParserInputBuffer {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlBuffer {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlValidCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchema {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchemaParserCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchemaValidCtxt {
    _private: [u8; 0],
}

/// Public layout of `struct _xmlNode`
#[repr(C)]
pub struct XmlNode {
    pub _private: *mut c_void,
    pub node_type: c_int,
    pub name: *const u8,
    pub children: *mut XmlNode,
    pub last: *mut XmlNode,
    pub parent: *mut XmlNode,
    pub next: *mut XmlNode,
    pub prev: *mut XmlNode,
    pub doc: *mut XmlDoc,
    pub ns: *mut c_void,
    pub content: *mut u8,
    pub properties: *mut c_void,
    pub ns_def: *mut c_void,
    pub psvi: *mut c_void,
    pub line: c_ushort,
    pub extra: c_ushort,
}

#[repr(C)]
pub struct XmlError {
    pub domain: c_int,
    pub code: c_int,
    pub message: *const c_char,
    pub level: c_int,
    pub file: *const c_char,
    pub line: c_int,
    pub str1: *const c_char,
    pub str2: *const c_char,
    pub str3: *const c_char,
    pub int1: c_int,
    pub int2: c_int,
    pub ctxt: *mut c_void,
    pub node: *mut c_void,
}

pub type XmlStructuredErrorFunc =
    Option<unsafe extern "C" fn(user_data: *mut c_void, error: *mut XmlError)>;

pub type XmlExternalEntityLoader = Option<
    unsafe extern "C" fn(
        url: *const c_char,
        id: *const c_char,
        ctxt: *mut XmlParserCtxt,
    ) -> *mut XmlParserInput,
>;

pub type XmlFreeFunc = Option<unsafe extern "C" fn(mem: *mut c_void)>;

// External libxml2 FFI declarations
#[cfg_attr(target_os = "windows", link(name = "libxml2"))]
#[cfg_attr(not(target_os = "windows"), link(name = "xml2"))]
unsafe extern "C" {
    pub(crate) static xmlFree: XmlFreeFunc;

    fn xmlInitParser();
    fn xmlInitGlobals();

    // Error reporting
    fn xmlSetStructuredErrorFunc(ctx: *mut c_void, handler: XmlStructuredErrorFunc);
    fn xmlResetLastError();
    fn xmlGetLastError() -> *const XmlError;

    // Entity loading
    fn xmlSetExternalEntityLoader(f: XmlExternalEntityLoader);
    fn xmlParserInputBufferCreateMem(
        mem: *const c_char,
        size: c_int,
        enc: c_int,
    ) -> *mut XmlParserInputBuffer;
    fn xmlFreeParserInputBuffer(input: *mut XmlParserInputBuffer);
    fn xmlNewIOInputStream(
        ctxt: *mut XmlParserCtxt,
        input: *mut XmlParserInputBuffer,
        enc: c_int,
    ) -> *mut XmlParserInput;

    // Documents and trees
    pub(crate) fn xmlReadMemory(
        buffer: *const c_char,
        size: c_int,
        url: *const c_char,
        encoding: *const c_char,
        options: c_int,
    ) -> *mut XmlDoc;
    pub(crate) fn xmlFreeDoc(doc: *mut XmlDoc);
    pub(crate) fn xmlCopyDoc(doc: *mut XmlDoc, recursive: c_int) -> *mut XmlDoc;
    pub(crate) fn xmlDocGetRootElement(doc: *const XmlDoc) -> *mut XmlNode;
    pub(crate) fn xmlDocCopyNode(
        node: *mut XmlNode,
        doc: *mut XmlDoc,
        extended: c_int,
    ) -> *mut XmlNode;
    pub(crate) fn xmlAddPrevSibling(cur: *mut XmlNode, elem: *mut XmlNode) -> *mut XmlNode;
    pub(crate) fn xmlAddChild(parent: *mut XmlNode, cur: *mut XmlNode) -> *mut XmlNode;
    pub(crate) fn xmlUnlinkNode(cur: *mut XmlNode);
    pub(crate) fn xmlFreeNode(cur: *mut XmlNode);
    pub(crate) fn xmlGetProp(node: *const XmlNode, name: *const u8) -> *mut u8;
    pub(crate) fn xmlGetLineNo(node: *const XmlNode) -> c_long;
    pub(crate) fn xmlDocDumpMemory(doc: *mut XmlDoc, mem: *mut *mut u8, size: *mut c_int);
    pub(crate) fn xmlBufferCreate() -> *mut XmlBuffer;
    pub(crate) fn xmlBufferFree(buf: *mut XmlBuffer);
    pub(crate) fn xmlBufferContent(buf: *const XmlBuffer) -> *const u8;
    pub(crate) fn xmlNodeDump(
        buf: *mut XmlBuffer,
        doc: *mut XmlDoc,
        cur: *mut XmlNode,
        level: c_int,
        format: c_int,
    ) -> c_int;

    // DTD validation
    fn xmlNewValidCtxt() -> *mut XmlValidCtxt;
    fn xmlFreeValidCtxt(ctxt: *mut XmlValidCtxt);
    fn xmlValidateDocument(ctxt: *mut XmlValidCtxt, doc: *mut XmlDoc) -> c_int;

    // Schema parsing functions
    fn xmlSchemaNewMemParserCtxt(buffer: *const c_char, size: c_int) -> *mut XmlSchemaParserCtxt;
    fn xmlSchemaSetParserStructuredErrors(
        ctxt: *mut XmlSchemaParserCtxt,
        serror: XmlStructuredErrorFunc,
        ctx: *mut c_void,
    );
    fn xmlSchemaParse(ctxt: *const XmlSchemaParserCtxt) -> *mut XmlSchema;
    fn xmlSchemaFreeParserCtxt(ctxt: *mut XmlSchemaParserCtxt);
    fn xmlSchemaFree(schema: *mut XmlSchema);

    // Schema validation functions
    fn xmlSchemaNewValidCtxt(schema: *const XmlSchema) -> *mut XmlSchemaValidCtxt;
    fn xmlSchemaFreeValidCtxt(ctxt: *mut XmlSchemaValidCtxt);
    fn xmlSchemaSetValidStructuredErrors(
        ctxt: *mut XmlSchemaValidCtxt,
        serror: XmlStructuredErrorFunc,
        ctx: *mut c_void,
    );
    fn xmlSchemaValidateDoc(ctxt: *mut XmlSchemaValidCtxt, doc: *mut XmlDoc) -> c_int;
}

/// Free memory handed out by libxml2
///
/// # Safety
///
/// `mem` must have been allocated by libxml2 and not freed yet.
pub(crate) unsafe fn free_xml(mem: *mut c_void) {
    if mem.is_null() {
        return;
    }
    if let Some(free) = unsafe { xmlFree } {
        unsafe { free(mem) };
    }
}

/// Copy a libxml2-owned string into Rust and release it
///
/// # Safety
///
/// `ptr` must be null or a NUL-terminated string allocated by libxml2.
pub(crate) unsafe fn take_xml_string(ptr: *mut u8) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let value = unsafe { CStr::from_ptr(ptr as *const c_char) }
        .to_string_lossy()
        .into_owned();
    unsafe { free_xml(ptr as *mut c_void) };
    Some(value)
}

fn diagnostic_from_raw(error: &XmlError) -> Option<Diagnostic> {
    let level = match error.level {
        XML_ERR_WARNING => DiagnosticLevel::Warning,
        // refused entity loads surface as I/O errors and mean "no substitution"
        XML_ERR_ERROR | XML_ERR_FATAL if error.domain == XML_FROM_IO => DiagnosticLevel::Warning,
        XML_ERR_ERROR => DiagnosticLevel::Error,
        XML_ERR_FATAL => DiagnosticLevel::Fatal,
        _ => return None,
    };
    let message = if error.message.is_null() {
        format!("libxml2 error code {}", error.code)
    } else {
        unsafe { CStr::from_ptr(error.message) }
            .to_string_lossy()
            .trim()
            .to_string()
    };
    Some(Diagnostic::new(
        level,
        message,
        error.line.max(0) as u32,
        error.int2.max(0) as u32,
    ))
}

/// Callback for libxml2 to report problems (structured)
unsafe extern "C" fn structured_error_callback(user_data: *mut c_void, error: *mut XmlError) {
    if user_data.is_null() || error.is_null() {
        return;
    }
    let diagnostics = unsafe { &mut *(user_data as *mut Vec<Diagnostic>) };
    if let Some(diagnostic) = diagnostic_from_raw(unsafe { &*error }) {
        diagnostics.push(diagnostic);
    }
}

/// Last error recorded by libxml2 on this thread
fn last_error() -> Option<Diagnostic> {
    let error = unsafe { xmlGetLastError() };
    if error.is_null() {
        return None;
    }
    let error = unsafe { &*error };
    if error.code == 0 {
        return None;
    }
    diagnostic_from_raw(error)
}

/// Routes libxml2's per-thread structured error handler into a buffer
/// until dropped or finished.
struct ErrorCapture {
    diagnostics: Box<Vec<Diagnostic>>,
}

impl ErrorCapture {
    fn install() -> Self {
        let mut diagnostics = Box::new(Vec::new());
        unsafe {
            xmlResetLastError();
            xmlSetStructuredErrorFunc(
                &mut *diagnostics as *mut Vec<Diagnostic> as *mut c_void,
                Some(structured_error_callback),
            );
        }
        Self { diagnostics }
    }

    fn finish(mut self) -> Vec<Diagnostic> {
        unsafe { xmlSetStructuredErrorFunc(ptr::null_mut(), None) };
        std::mem::take(&mut *self.diagnostics)
    }
}

impl Drop for ErrorCapture {
    fn drop(&mut self) {
        unsafe { xmlSetStructuredErrorFunc(ptr::null_mut(), None) };
    }
}

/// A DTD the validator inserted into a document and is willing to serve
#[derive(Debug, Clone)]
pub(crate) struct DtdSource {
    pub location: String,
    pub data: Vec<u8>,
}

impl DtdSource {
    fn matches(&self, url: &str) -> bool {
        fn strip(s: &str) -> &str {
            s.strip_prefix("file://").unwrap_or(s)
        }
        strip(url) == strip(&self.location)
    }
}

struct ActiveScope {
    policy: Option<EntityPolicy>,
    dtd: Option<DtdSource>,
    // keeps loader input alive until the parse that requested it is over
    buffers: Vec<Vec<u8>>,
}

thread_local! {
    static ACTIVE_SCOPE: RefCell<Option<ActiveScope>> = const { RefCell::new(None) };
}

/// Makes an entity policy (and optionally one DTD) available to the
/// process-wide entity loader for the current thread.
pub(crate) struct ResolutionScope {
    previous: Option<ActiveScope>,
    _not_send: PhantomData<*const ()>,
}

impl ResolutionScope {
    pub(crate) fn enter(policy: Option<EntityPolicy>, dtd: Option<DtdSource>) -> Self {
        let previous = ACTIVE_SCOPE.with(|scope| {
            scope.replace(Some(ActiveScope {
                policy,
                dtd,
                buffers: Vec::new(),
            }))
        });
        Self {
            previous,
            _not_send: PhantomData,
        }
    }
}

impl Drop for ResolutionScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        ACTIVE_SCOPE.with(|scope| *scope.borrow_mut() = previous);
    }
}

fn lookup_in_scope(url: &str) -> Option<(*const u8, usize)> {
    let (policy, dtd) = ACTIVE_SCOPE.with(|scope| {
        scope
            .borrow()
            .as_ref()
            .map(|active| (active.policy.clone(), active.dtd.clone()))
    })?;

    let data = match dtd {
        Some(dtd) if dtd.matches(url) => Some(dtd.data),
        _ => policy.and_then(|policy| policy.resolve(url)),
    }?;

    ACTIVE_SCOPE.with(|scope| {
        let mut scope = scope.borrow_mut();
        let active = scope.as_mut()?;
        active.buffers.push(data);
        active.buffers.last().map(|b| (b.as_ptr(), b.len()))
    })
}

/// The only external entity loader libxml2 ever uses in this process.
///
/// Returns null ("no substitution") for every reference the active scope
/// does not explicitly allow.
unsafe extern "C" fn rule_entity_loader(
    url: *const c_char,
    _id: *const c_char,
    ctxt: *mut XmlParserCtxt,
) -> *mut XmlParserInput {
    if url.is_null() {
        return ptr::null_mut();
    }
    let url = unsafe { CStr::from_ptr(url) }.to_string_lossy().into_owned();

    let found = catch_unwind(AssertUnwindSafe(|| lookup_in_scope(&url))).unwrap_or(None);
    let Some((data, len)) = found else {
        tracing::debug!("Refusing external entity {}", url);
        return ptr::null_mut();
    };
    let Ok(size) = c_int::try_from(len) else {
        return ptr::null_mut();
    };

    unsafe {
        let buffer =
            xmlParserInputBufferCreateMem(data as *const c_char, size, XML_CHAR_ENCODING_NONE);
        if buffer.is_null() {
            return ptr::null_mut();
        }
        let input = xmlNewIOInputStream(ctxt, buffer, XML_CHAR_ENCODING_NONE);
        if input.is_null() {
            xmlFreeParserInputBuffer(buffer);
        }
        input
    }
}

/// Outcome of parsing a buffer: the document (if well-formed) and every
/// diagnostic libxml2 raised along the way.
pub(crate) struct ParseOutcome {
    pub doc: Option<NonNull<XmlDoc>>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Thread-safe wrapper for libxml2 schema pointer with proper resource management
#[derive(Debug)]
pub struct XmlSchemaPtr {
    inner: Arc<XmlSchemaInner>,
}

#[derive(Debug)]
struct XmlSchemaInner {
    ptr: *mut XmlSchema,
}

// Safety: libxml2 documentation states that xmlSchema structures are thread-safe for reading
// See: http://xmlsoft.org/threads.html
unsafe impl Send for XmlSchemaInner {}
unsafe impl Sync for XmlSchemaInner {}

impl XmlSchemaPtr {
    /// # Safety
    ///
    /// `ptr` must come from `xmlSchemaParse` and must not be freed elsewhere.
    unsafe fn from_raw(ptr: *mut XmlSchema) -> LibXml2Result<Self> {
        if ptr.is_null() {
            return Err(LibXml2Error::SchemaParseFailed {
                details: "null schema pointer".to_string(),
            });
        }
        Ok(XmlSchemaPtr {
            inner: Arc::new(XmlSchemaInner { ptr }),
        })
    }

    fn as_ptr(&self) -> *const XmlSchema {
        self.inner.ptr
    }

    pub fn is_valid(&self) -> bool {
        !self.inner.ptr.is_null()
    }
}

impl Clone for XmlSchemaPtr {
    fn clone(&self) -> Self {
        XmlSchemaPtr {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for XmlSchemaInner {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe { xmlSchemaFree(self.ptr) };
            self.ptr = ptr::null_mut();
        }
    }
}

/// Safe entry points into libxml2
#[derive(Debug, Clone, Copy)]
pub struct LibXml2Wrapper {
    _phantom: PhantomData<()>,
}

impl LibXml2Wrapper {
    /// Initializes libxml2 and installs the entity loader on first use.
    pub fn new() -> Self {
        LIBXML2_INIT.call_once(|| unsafe {
            xmlInitParser();
            xmlInitGlobals();
            xmlSetExternalEntityLoader(Some(rule_entity_loader));
        });

        LibXml2Wrapper {
            _phantom: PhantomData,
        }
    }

    /// Parse a buffer into a document. The caller owns the returned document.
    pub(crate) fn read_memory(&self, data: &[u8], options: c_int) -> LibXml2Result<ParseOutcome> {
        let size = c_int::try_from(data.len())
            .map_err(|_| LibXml2Error::InputTooLarge { size: data.len() })?;

        let capture = ErrorCapture::install();
        let doc = unsafe {
            xmlReadMemory(
                data.as_ptr() as *const c_char,
                size,
                ptr::null(),
                ptr::null(),
                options,
            )
        };
        let mut diagnostics = capture.finish();

        if doc.is_null() && diagnostics.iter().all(|d| d.level == DiagnosticLevel::Warning) {
            diagnostics.extend(last_error());
        }

        Ok(ParseOutcome {
            doc: NonNull::new(doc),
            diagnostics,
        })
    }

    /// Validate a parsed document against the DTD it loaded.
    ///
    /// Returns whether libxml2 judged it valid, plus everything it reported.
    pub(crate) fn validate_dtd(&self, doc: NonNull<XmlDoc>) -> LibXml2Result<(bool, Vec<Diagnostic>)> {
        let capture = ErrorCapture::install();
        let valid = unsafe {
            let ctxt = xmlNewValidCtxt();
            if ctxt.is_null() {
                return Err(LibXml2Error::ValidationContextCreationFailed);
            }
            let valid = xmlValidateDocument(ctxt, doc.as_ptr());
            xmlFreeValidCtxt(ctxt);
            valid
        };
        let mut diagnostics = capture.finish();
        if valid == 0 && diagnostics.is_empty() {
            diagnostics.extend(last_error());
        }
        Ok((valid != 0, diagnostics))
    }

    /// Parse an XML schema from memory buffer
    ///
    /// Schema parsing is serialized process-wide; includes and imports go
    /// through the entity loader of the active [`ResolutionScope`].
    pub fn parse_schema_from_memory(&self, schema_data: &[u8]) -> LibXml2Result<XmlSchemaPtr> {
        let size = c_int::try_from(schema_data.len()).map_err(|_| LibXml2Error::InputTooLarge {
            size: schema_data.len(),
        })?;
        let _guard = SCHEMA_PARSE_LOCK.lock();

        let mut diagnostics: Vec<Diagnostic> = Vec::new();
        unsafe {
            let parser_ctxt = xmlSchemaNewMemParserCtxt(schema_data.as_ptr() as *const c_char, size);
            if parser_ctxt.is_null() {
                return Err(LibXml2Error::MemoryAllocation);
            }
            xmlSchemaSetParserStructuredErrors(
                parser_ctxt,
                Some(structured_error_callback),
                &mut diagnostics as *mut Vec<Diagnostic> as *mut c_void,
            );

            let schema_ptr = xmlSchemaParse(parser_ctxt);

            // Always free the parser context
            xmlSchemaFreeParserCtxt(parser_ctxt);

            if schema_ptr.is_null() {
                let details = diagnostics
                    .first()
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "schema could not be compiled".to_string());
                return Err(LibXml2Error::SchemaParseFailed { details });
            }

            XmlSchemaPtr::from_raw(schema_ptr)
        }
    }

    /// Validate a parsed document against a compiled schema
    ///
    /// Returns libxml2's result code (0 = valid) and the diagnostics raised.
    pub(crate) fn validate_doc(
        &self,
        schema: &XmlSchemaPtr,
        doc: NonNull<XmlDoc>,
    ) -> LibXml2Result<(c_int, Vec<Diagnostic>)> {
        let mut diagnostics: Vec<Diagnostic> = Vec::new();
        let code = unsafe {
            let valid_ctxt = xmlSchemaNewValidCtxt(schema.as_ptr());
            if valid_ctxt.is_null() {
                return Err(LibXml2Error::ValidationContextCreationFailed);
            }
            xmlSchemaSetValidStructuredErrors(
                valid_ctxt,
                Some(structured_error_callback),
                &mut diagnostics as *mut Vec<Diagnostic> as *mut c_void,
            );
            let code = xmlSchemaValidateDoc(valid_ctxt, doc.as_ptr());
            xmlSchemaFreeValidCtxt(valid_ctxt);
            code
        };
        Ok((code, diagnostics))
    }
}

impl Default for LibXml2Wrapper {
    fn default() -> Self {
        Self::new()
    }
}
