pub mod builders;
pub mod db;

pub use builders::{AccessScopeBuilder, ScopeBindingBuilder, ScopeBuilder};
pub use db::{seed_agent, seed_person, seed_team, TestDb};
