use std::fmt;

use thiserror::Error;

/// A single problem reported by libxml2 while parsing or validating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
    /// 1-based line, 0 when libxml2 did not know it
    pub line: u32,
    /// 1-based column, 0 when libxml2 did not know it
    pub column: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticLevel {
    Warning,
    Error,
    Fatal,
}

impl Diagnostic {
    pub fn new(level: DiagnosticLevel, message: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            level,
            message: message.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Problem found at line {}, column {}.",
            self.message, self.line, self.column
        )
    }
}

/// Main error type covering every failure mode of rule ingestion and disambiguation
#[derive(Error, Debug)]
pub enum RuleCoreError {
    #[error("Resource not found: {name}")]
    ResourceNotFound { name: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML parse error in {source_name}: {message} (line {line}, column {column})")]
    Parse {
        source_name: String,
        message: String,
        line: u32,
        column: u32,
    },

    #[error("Cannot merge into {target}: {details}")]
    Merge { target: String, details: String },

    #[error("Validation failed for {source_name}: {message} Problem found at line {line}, column {column}.")]
    Validation {
        source_name: String,
        message: String,
        line: u32,
        column: u32,
    },

    #[error("Disambiguation input error: {0}")]
    DisambiguationInput(#[from] DisambiguationInputError),

    #[error("LibXML2 internal error: {details}")]
    LibXml2Internal { details: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RuleCoreError {
    pub fn parse(source_name: impl Into<String>, diagnostic: Diagnostic) -> Self {
        RuleCoreError::Parse {
            source_name: source_name.into(),
            message: diagnostic.message,
            line: diagnostic.line,
            column: diagnostic.column,
        }
    }

    pub fn validation(source_name: impl Into<String>, diagnostic: Diagnostic) -> Self {
        RuleCoreError::Validation {
            source_name: source_name.into(),
            message: diagnostic.message,
            line: diagnostic.line,
            column: diagnostic.column,
        }
    }

    pub fn not_found(name: impl Into<String>) -> Self {
        RuleCoreError::ResourceNotFound { name: name.into() }
    }

    /// Line of the offending construct for parse and validation failures
    pub fn line(&self) -> Option<u32> {
        match self {
            RuleCoreError::Parse { line, .. } | RuleCoreError::Validation { line, .. } => {
                Some(*line)
            }
            _ => None,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, RuleCoreError::Validation { .. })
    }
}

/// Malformed token-reading input handed to the disambiguation pipeline
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DisambiguationInputError {
    #[error("Token '{token}' at position {position} has no readings")]
    NoReadings { token: String, position: usize },

    #[error("Span marker '{marker}' does not name a tag")]
    UnnamedSpanMarker { marker: String },

    #[error("Malformed multiword entry at line {line}: {details}")]
    MalformedMultiword { line: usize, details: String },

    #[error("Rule {rule} rejected the sentence: {details}")]
    RuleApplication { rule: String, details: String },
}

/// LibXML2-specific error types
#[derive(Error, Debug)]
pub enum LibXml2Error {
    #[error("Schema parsing failed: {details}")]
    SchemaParseFailed { details: String },

    #[error("Validation context creation failed")]
    ValidationContextCreationFailed,

    #[error("Memory allocation failed in libxml2")]
    MemoryAllocation,

    #[error("Input of {size} bytes exceeds what libxml2 accepts")]
    InputTooLarge { size: usize },

    #[error("Node copy failed while building {document}")]
    NodeCopyFailed { document: String },
}

impl From<LibXml2Error> for RuleCoreError {
    fn from(err: LibXml2Error) -> Self {
        RuleCoreError::LibXml2Internal {
            details: err.to_string(),
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, RuleCoreError>;

/// LibXML2 result type alias
pub type LibXml2Result<T> = std::result::Result<T, LibXml2Error>;
