use crate::jvm;
use crate::jvm::class_graph::TypeNotFound;
use crate::jvm::VerifierErrorKind;
use std::fmt;

/// Identity of a method: owner class, name, and descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}{}", self.owner, self.name, self.descriptor)
    }
}

/// Why a method could not be transformed
#[derive(Debug)]
pub enum Failure {
    /// A type needed to merge frames is not in the type universe
    TypeResolution(TypeNotFound),

    /// The method body is structurally inconsistent (or uses `jsr`/`ret`)
    Analysis(jvm::Error),

    /// An instruction pattern assumed by a relocation does not hold
    InternalConsistency(String),

    /// The rewritten method could not be assembled
    Encoding(jvm::Error),
}

/// Failure to transform a class
///
/// There is no partial output: any error means the class could not be instrumented.
#[derive(Debug)]
pub enum Error {
    /// The class file itself could not be read or written
    ClassFormat(jvm::Error),

    /// One method could not be transformed
    Method { method: MethodRef, failure: Failure },
}

impl From<jvm::Error> for Error {
    fn from(err: jvm::Error) -> Error {
        Error::ClassFormat(err)
    }
}

impl From<TypeNotFound> for Failure {
    fn from(err: TypeNotFound) -> Failure {
        Failure::TypeResolution(err)
    }
}

impl Failure {
    /// Classify an error coming out of decoding or analysis
    pub fn analysis(err: jvm::Error) -> Failure {
        match err {
            jvm::Error::VerifierError {
                kind: VerifierErrorKind::TypeNotFound(name),
                ..
            } => Failure::TypeResolution(TypeNotFound(name)),
            err => Failure::Analysis(err),
        }
    }

    /// Classify an error coming out of assembling the method
    pub fn encoding(err: jvm::Error) -> Failure {
        match err {
            jvm::Error::VerifierError { .. } => Failure::analysis(err),
            err => Failure::Encoding(err),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Failure::TypeResolution(err) => write!(f, "type resolution failed: {}", err),
            Failure::Analysis(err) => write!(f, "analysis failed: {}", err),
            Failure::InternalConsistency(msg) => write!(f, "internal consistency failure: {}", msg),
            Failure::Encoding(err) => write!(f, "encoding failed: {}", err),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ClassFormat(err) => write!(f, "{}", err),
            Error::Method { method, failure } => write!(f, "{}: {}", method, failure),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ClassFormat(err) => Some(err),
            Error::Method {
                failure: Failure::TypeResolution(err),
                ..
            } => Some(err),
            Error::Method {
                failure: Failure::Analysis(err) | Failure::Encoding(err),
                ..
            } => Some(err),
            Error::Method { .. } => None,
        }
    }
}
