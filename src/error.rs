//! Structured error type shared by every public operation in this crate.
//!
//! This replaces the C++ original's `errorNode`/`errorOut` linked list
//! (a hand-rolled cause chain) with `thiserror`'s `#[source]` chaining:
//! walking `std::error::Error::source()` reproduces walking `next`.

use thiserror::Error;

/// The error type returned by every public operation in this crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Sizes of indices, weights, xi vectors, displacements, or DOF vectors
    /// are inconsistent with each other.
    #[error("shape mismatch in {context}: {message}")]
    ShapeMismatch {
        /// Name of the operation that detected the mismatch.
        context: &'static str,
        /// Human readable detail.
        message: String,
    },

    /// A destination index (micro node, macro node, DOF) exceeds the
    /// bounds of the buffer it indexes into.
    #[error("index out of range in {context}: {message}")]
    IndexOutOfRange {
        /// Name of the operation that detected the out-of-range index.
        context: &'static str,
        /// Human readable detail.
        message: String,
    },

    /// A configuration option is missing, malformed, or names an
    /// unsupported variant (e.g. an unknown `type` or `element_type`).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An I/O boundary failed. No concrete I/O backend ships in this
    /// crate (see SPEC_FULL.md EXPANSION-6); this variant exists so a
    /// future reader/writer can report through the same chain.
    #[error("I/O error: {0}")]
    Io(String),

    /// A numerical procedure did not converge or could not produce a
    /// result (Newton iteration, linear solve, isosurface location).
    #[error("numerical failure in {context}: {message}")]
    Numerical {
        /// Name of the operation that detected the failure.
        context: &'static str,
        /// Human readable detail.
        message: String,
    },

    /// The requested case is not implemented (e.g. a geometry type other
    /// than `XYZ`, or an element type other than `Hex8`).
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Wraps a lower-level error, preserving it as the `source()` so the
    /// whole chain can be walked/printed by the caller.
    #[error("{message}")]
    Chained {
        /// Human readable detail for this link in the chain.
        message: String,
        /// The next error down the chain.
        #[source]
        source: Box<CoreError>,
    },
}

impl CoreError {
    /// Builds a [`CoreError::ShapeMismatch`].
    pub fn shape_mismatch(context: &'static str, message: impl Into<String>) -> Self {
        CoreError::ShapeMismatch {
            context,
            message: message.into(),
        }
    }

    /// Builds a [`CoreError::IndexOutOfRange`].
    pub fn index_out_of_range(context: &'static str, message: impl Into<String>) -> Self {
        CoreError::IndexOutOfRange {
            context,
            message: message.into(),
        }
    }

    /// Builds a [`CoreError::Numerical`] failure.
    pub fn numerical(context: &'static str, message: impl Into<String>) -> Self {
        CoreError::Numerical {
            context,
            message: message.into(),
        }
    }

    /// Attaches `self` as the cause of a new error, mirroring the
    /// original `errorNode::addNext` chaining.
    pub fn chain(self, message: impl Into<String>) -> Self {
        CoreError::Chained {
            message: message.into(),
            source: Box::new(self),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type CoreResult<T> = Result<T, CoreError>;
