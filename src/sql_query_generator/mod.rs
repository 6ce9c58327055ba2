//! Compile filters, orderings and selections into MariaDB statements.

mod errors;
mod escaping;
mod statements;
mod table_reference;
mod to_sql;

pub use errors::SqlGeneratorError;
pub use escaping::{Dialect, MariaDbDialect};
pub use statements::{
    DeferredFetch, FindOptions, FindStatement, StatementGenerator, IDENTIFIER_KEY, PARENT_KEY,
};
pub use table_reference::{JoinRelation, JoinTable, TableNode};
pub use to_sql::{SqlContext, ToSql};
