pub mod admin;
pub mod audit;
pub mod decision;
pub mod errors;
pub mod rbac;
pub mod registry;
pub mod rules;
pub mod script;
pub mod types;

pub use decision::DecisionEngine;
pub use errors::EngineError;
pub use types::Principal;
