//! Mission Control authorization core
//!
//! RBAC/ABAC decisions, role bindings and row-level security payloads behind
//! one embeddable [`authz::Engine`]. All modules are public for hosts and tests.

pub mod authz;
pub mod entities;
pub mod errors;
pub mod jobs;
pub mod settings;
pub mod storage;
