//! In-process stores.
//!
//! Used by tests and for dry runs of the pipeline without external services.

mod source;
mod target;

pub use source::MemorySource;
pub use target::MemoryTarget;
