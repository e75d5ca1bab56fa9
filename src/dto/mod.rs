//! Request and response payloads for the HTTP surface.

pub mod game;
pub mod health;
