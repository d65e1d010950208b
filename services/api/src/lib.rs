pub mod adapters;
pub mod config;
pub mod error;
pub mod watchdog;
pub mod web;
