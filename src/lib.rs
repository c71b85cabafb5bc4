pub mod aggregate;
pub mod cache;
pub mod config;
pub mod control;
pub mod error;
pub mod fetch;
pub mod filter;
pub mod model;
pub mod normalize;
pub mod output;
pub mod pipeline;
pub mod summary;
