pub mod config;
pub mod db;
pub mod error;
pub mod meta;
pub(crate) mod utils;

pub use error::{MetadataError, MetadataResult};
