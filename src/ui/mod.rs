pub mod icons;
pub mod output;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{error, header, info, muted, object_header, references, section, success, warn};
pub use table::{fields_table, objects_table, pointer_fields, render_value, stats_table};
pub use theme::{theme, Theme};
