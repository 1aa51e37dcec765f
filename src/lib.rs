pub mod cli;
pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod report;
