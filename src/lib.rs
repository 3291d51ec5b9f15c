pub mod api;
pub mod app;
pub mod auth;
pub mod config;
pub mod db;
pub mod device;
pub mod errors;
pub mod ledger;
pub mod model;

#[cfg(test)]
mod testing;
