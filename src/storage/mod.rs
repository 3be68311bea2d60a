//! Storage backends: the SQL primary, the per-context SQLite fallback, and
//! an in-memory primary for failure injection.

pub mod fallback;
pub mod memory;
pub mod primary;
pub mod rows;
pub mod traits;
