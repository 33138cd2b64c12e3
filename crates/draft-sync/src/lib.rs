pub mod api;
pub mod config;
pub mod draft;
pub mod monitor;
pub mod players;
pub mod scoring;
pub mod setup;
pub mod sheet;
