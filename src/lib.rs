pub mod analyzers;
pub mod config;
pub mod extract;
pub mod fetch;
pub mod infra;
pub mod load;
pub mod output;
pub mod record;
pub mod retry;
pub mod services;
pub mod transform;
