//! Core library for the wiki-user-export command line application.
//!
//! The library exposes the orchestration helpers that power the command-line
//! interface as well as the tests. Responsibilities are kept narrow: wiki,
//! database and file adapters live under [`io`], records and field schemas in
//! [`model`], the table layout in [`workbook`], typed settings in [`config`],
//! and the run itself under [`sync`].

pub mod config;
pub mod error;
pub mod io;
pub mod model;
pub mod sync;
pub mod workbook;

pub use error::{Result, ToolError};
