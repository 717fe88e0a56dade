//! This module defines errors returned by the library.
use thiserror::Error;

/// Errors returned by the transform and multi-scalar engines
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum EngineError {
  /// returned if the requested domain exceeds the two-adicity of the scalar field
  #[error("DomainTooLarge: requested 2^{requested}, field supports 2^{two_adicity}")]
  DomainTooLarge {
    /// the requested domain power
    requested: u32,
    /// the two-adicity of the scalar field
    two_adicity: u32,
  },
  /// returned if a transform is invoked on a length that is not a power of two
  #[error("InvalidTransformSize: {size}")]
  InvalidTransformSize {
    /// the offending input length
    size: usize,
  },
  /// returned if a transform is invoked on a length above the engine's domain
  #[error("TransformTooLarge: {size} > {max}")]
  TransformTooLarge {
    /// the offending input length
    size: usize,
    /// the largest length the engine was built for
    max: usize,
  },
  /// returned if the supplied scalar buffer does not match the bases
  #[error("InvalidInputLength")]
  InvalidInputLength,
}
