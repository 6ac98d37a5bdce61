pub mod column_map;

pub use column_map::{ColumnDef, ColumnMap, ColumnOverride};
