pub mod access;
pub mod auth;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod models;
pub mod response;
pub mod routes;
pub mod scheduling;
pub mod schema;
pub mod state;
pub mod storage;
pub mod utils;
pub mod validation;
