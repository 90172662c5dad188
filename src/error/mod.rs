mod metadata;

pub use metadata::{MetadataError, MetadataResult};
