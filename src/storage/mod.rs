//! Embedded storage: schema, migrations, path resolution, and the
//! writer/reader connection pool.

pub mod migrations;
pub mod path;
pub mod pool;
pub mod schema;

pub use migrations::{MigrationReport, MigrationRunner};
pub use pool::{ConnectionPool, close_pool, create_pool, global_pool};
