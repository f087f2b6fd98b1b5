pub mod access_scope;
pub mod agent;
pub mod casbin_rule;
pub mod person;
pub mod scope;
pub mod scope_binding;
pub mod team;
pub mod team_member;

pub use access_scope::Entity as AccessScope;
pub use agent::Entity as Agent;
pub use casbin_rule::Entity as CasbinRule;
pub use person::Entity as Person;
pub use scope::Entity as Scope;
pub use scope_binding::Entity as ScopeBinding;
pub use team::Entity as Team;
pub use team_member::Entity as TeamMember;
