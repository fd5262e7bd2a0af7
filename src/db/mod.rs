// Local SQLite article store
mod article;
pub mod core;
mod schema;

// Re-export Database and essential traits
pub use self::core::Database;
pub use self::core::DbLockErrorExt;
