// Library exports for emoshare
// This allows integration tests and external code to use emoshare modules

pub mod auth;
pub mod config;
pub mod error;
pub mod extractors;
pub mod feed;
pub mod routes;
pub mod state;
pub mod store;
pub mod users;
