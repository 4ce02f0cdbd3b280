pub(crate) mod text;
pub(crate) mod utf16;

pub use self::text::{LINE_BREAK_SEPARATOR, collapse_line_breaks, first_line, single_line};
