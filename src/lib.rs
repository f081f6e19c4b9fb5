pub mod ai;
pub mod batch;
pub mod cache;
pub mod cli;
pub mod config;
pub mod format;
pub mod merge;
pub mod notify;
pub mod pipeline;
pub mod record;
pub mod rules;
pub mod scheduler;
pub mod source;
pub mod verdict;
