//! Collection types used by the improvement engine.
//!
//! Hash maps and sets use the `FxHash` family from `rustc-hash`; short-lived
//! per-attempt buffers use `SmallVec` so that typical ring and cavity sizes stay
//! on the stack.

mod aliases;
mod helpers;

pub use aliases::*;
pub use helpers::*;
