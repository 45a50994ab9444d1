//! Dense linear-system backends used by the proportional allocator.

pub mod backend;

pub use backend::{LinearSystemBackend, LuSolver};
