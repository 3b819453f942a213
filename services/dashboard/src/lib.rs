//! services/dashboard/src/lib.rs
//!
//! Store adapters, view controllers and the HTTP/WebSocket surface of the
//! session ledger dashboard.

pub mod adapters;
pub mod config;
pub mod error;
pub mod seed;
pub mod views;
pub mod web;
