pub mod api;
pub mod config;
pub mod error;
pub mod migrations;
pub mod models;
pub mod services;
pub mod state;

#[cfg(test)]
pub mod test_helpers;
