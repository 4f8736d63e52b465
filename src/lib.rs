pub mod auth;
pub mod budget;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod error;
pub mod models;
pub mod registry;
pub mod routes;
pub mod services;
pub mod state;
pub mod sync;
