pub mod archive;
pub mod database;
pub mod excel_write;
pub mod source;
pub mod theme;
pub mod wiki;
