//! visearch - image similarity search over an Elasticsearch kNN index
//!
//! Ingests a directory tree of images as CLIP embeddings (with optional EXIF
//! capture date and GPS location), then answers text, existing-image and
//! uploaded-image queries with a kNN search over the same vector space.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod metadata;
pub mod search;
pub mod server;
pub mod store;

pub use error::{Result, VisearchError};
