pub mod elector;
pub mod role;

pub use elector::{LeaderElector, LeadershipHooks};
pub use role::{LeaderLease, Role, RoleState};
