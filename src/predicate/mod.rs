//! Filter parameter validation and comparison construction.

pub mod matchers;
pub mod validate;

pub use validate::Range;
