use thiserror::Error;

/// Encoding errors.
#[derive(Debug, Error)]
pub enum Error {
  /// Incompatible option combination, reported at open.
  #[error("Invalid configuration: {0}")]
  ConfigInvalid(String),
  /// A band of input arrived at a position the encoder did not expect.
  #[error("Picture band at row {got} not at expected row {expected}")]
  GeometryMismatch { expected: usize, got: usize },
  /// Malformed input data (y4m header, truncated plane, ...).
  #[error("Invalid input data: {0}")]
  InvalidInputData(String),
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
}

/// A specialised `Result` type for encoding operations.
pub type Result<T> = ::std::result::Result<T, Error>;
