use std::fmt;

#[derive(Debug)]
pub enum SvgError {
    MalformedTransform { input: String, reason: String },
    MalformedPathData { input: String, reason: String },
    InvalidIdFormat(String),
    DuplicateId(String),
    UnsupportedReferenceScheme(String),
    InvalidFilterParameter(String),
    MissingReferencedElement(String),
    InvalidNode(String),
    Xml(String),
    Load(String),
    Raster(String),
    Io(std::io::Error),
}

impl fmt::Display for SvgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SvgError::MalformedTransform { input, reason } => {
                write!(f, "malformed transform '{}': {}", input, reason)
            }
            SvgError::MalformedPathData { input, reason } => {
                write!(f, "malformed path data '{}': {}", input, reason)
            }
            SvgError::InvalidIdFormat(id) => {
                write!(f, "ID cannot start with a digit: '{}'", id)
            }
            SvgError::DuplicateId(id) => {
                write!(f, "an element with the same ID already exists: '{}'", id)
            }
            SvgError::UnsupportedReferenceScheme(scheme) => {
                write!(f, "unsupported reference scheme: '{}'", scheme)
            }
            SvgError::InvalidFilterParameter(message) => {
                write!(f, "invalid filter parameter: {}", message)
            }
            SvgError::MissingReferencedElement(reference) => {
                write!(f, "referenced element not found: '{}'", reference)
            }
            SvgError::InvalidNode(message) => write!(f, "invalid node operation: {}", message),
            SvgError::Xml(message) => write!(f, "xml error: {}", message),
            SvgError::Load(message) => write!(f, "load error: {}", message),
            SvgError::Raster(message) => write!(f, "raster error: {}", message),
            SvgError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for SvgError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SvgError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SvgError {
    fn from(value: std::io::Error) -> Self {
        SvgError::Io(value)
    }
}

impl From<roxmltree::Error> for SvgError {
    fn from(value: roxmltree::Error) -> Self {
        SvgError::Xml(value.to_string())
    }
}
