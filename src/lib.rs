pub mod aggregate;
pub mod app;
pub mod archive;
pub mod calls;
pub mod catalogue;
pub mod config;
pub mod dataset;
pub mod domain;
pub mod embed;
pub mod error;
pub mod fetch;
pub mod join;
pub mod normalize;
pub mod output;
pub mod pipeline;
pub mod qc;
pub mod store;
pub mod table;
pub mod tsv;
