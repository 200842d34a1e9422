pub mod allele;
pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod interchange;
pub mod loader;
pub mod mapper;
pub mod output;
pub mod pharmgkb;
pub mod raw;
pub mod reader;
pub mod reconcile;
pub mod store;
