// UI and formatting module

pub mod table;

// Re-export commonly used items for cleaner imports
pub use table::{render_table, status_banner, table_header};
