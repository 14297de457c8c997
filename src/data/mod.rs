//! Bar validation and bounded OHLCV buffering

mod buffer;
mod validator;

pub use buffer::{Bar, OhlcvBuffer, MIN_BARS_FOR_FEATURES};
pub use validator::{DataValidator, ValidationOutcome};
