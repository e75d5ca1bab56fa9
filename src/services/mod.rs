//! Service layer: the reconciliation components and their collaborators.

pub mod health_service;
pub mod idempotency;
pub mod notifier;
pub mod rate_limit;
pub mod scheduler;
pub mod signup;
pub mod stats;
pub mod storage_supervisor;
pub mod voting;
