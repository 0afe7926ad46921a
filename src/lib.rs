pub mod archive;
pub mod backup;
pub mod cli;
pub mod commands;
pub mod config;
pub mod convert;
pub mod db;
pub mod error;
pub mod metadata;
pub mod restore;
pub mod target;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
