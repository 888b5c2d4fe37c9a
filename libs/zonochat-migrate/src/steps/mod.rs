//! Built-in step kinds.

pub mod add_column;
pub mod backfill;
pub mod create_table;
pub mod ensure_row;
pub mod sql_file;

pub use add_column::AddColumnStep;
pub use backfill::BackfillStep;
pub use create_table::CreateTableStep;
pub use ensure_row::EnsureRowStep;
pub use sql_file::{SqlFileStep, discover_sql_files, load_sql_dir};
