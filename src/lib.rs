//! Library crate for matchday-back, exposing modules for binaries and integration tests.

pub mod clock;
pub mod config;
pub mod dao;
pub mod dto;
pub mod error;
pub mod events;
pub mod routes;
pub mod services;
pub mod state;
