//! AIS vessel tracking relay
//!
//! Collects vessel positions from several AIS providers into one cache and
//! relays them to web clients in real time.

pub mod config;
pub mod database;
pub mod errors;
pub mod hub;
pub mod manager;
pub mod models;
pub mod providers;
pub mod relay;
pub mod tracking;
