//! Error types for DuoGraph operations.
//!
//! Only recoverable conditions are represented here. Lock-discipline
//! violations (writing while holding a read handle, undo out of state,
//! writing from a registered event thread) are caller bugs and panic
//! immediately instead of returning an error.

use std::error::Error;
use std::fmt;
use std::time::Duration;

use crate::value::ElementKind;

/// DuoGraph error types with contextual detail.
#[derive(Debug, Clone)]
pub enum GraphError {
    /// Two elements share the same primary-key value tuple.
    ///
    /// Raised by commit-time validation; the offending transaction has
    /// already been rolled back when this propagates.
    DuplicateKey {
        /// Element family the key constraint belongs to
        kind: ElementKind,
        /// Names of the key attributes forming the violated tuple
        attributes: Vec<String>,
        /// First element holding the tuple
        first: u32,
        /// Second element holding the same tuple
        second: u32,
    },

    /// An attribute with this name is already registered for the kind.
    AttributeExists {
        kind: ElementKind,
        name: String,
    },

    /// Attribute id does not refer to a registered attribute.
    UnknownAttribute {
        id: u32,
    },

    /// Element id does not refer to a live vertex or edge.
    UnknownElement {
        kind: ElementKind,
        id: u32,
    },

    /// Attribute applied to an element of the wrong kind.
    KindMismatch {
        attribute: String,
        expected: ElementKind,
        actual: ElementKind,
    },

    /// Bounded wait for the global write lock expired.
    ///
    /// The transaction never started, so there is no partial state.
    WaitTimeout {
        waited: Duration,
    },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::DuplicateKey { kind, attributes, first, second } => {
                write!(
                    f,
                    "duplicate {} key [{}]: elements {} and {} share the same key values",
                    kind,
                    attributes.join(", "),
                    first,
                    second
                )
            }

            GraphError::AttributeExists { kind, name } => {
                write!(f, "{} attribute '{}' is already registered", kind, name)
            }

            GraphError::UnknownAttribute { id } => {
                write!(f, "attribute id {} is not registered", id)
            }

            GraphError::UnknownElement { kind, id } => {
                write!(f, "{} {} does not exist", kind, id)
            }

            GraphError::KindMismatch { attribute, expected, actual } => {
                write!(
                    f,
                    "attribute '{}' describes {} elements, got a {} id",
                    attribute, expected, actual
                )
            }

            GraphError::WaitTimeout { waited } => {
                write!(f, "write lock not acquired within {:?}", waited)
            }
        }
    }
}

impl Error for GraphError {}

/// Result type alias for DuoGraph operations.
pub type GraphResult<T> = Result<T, GraphError>;
