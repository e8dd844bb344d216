pub mod auth;
pub mod config;
pub mod db;
pub mod model;
pub mod sync;
pub mod xero;
