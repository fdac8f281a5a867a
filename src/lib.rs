pub mod app;
pub mod builtin;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod domain;
pub mod error;
pub mod format;
pub mod graph;
pub mod output;
pub mod provenance;
pub mod store;
pub mod tool;
pub mod transform;
