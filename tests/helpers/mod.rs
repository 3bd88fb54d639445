pub mod builders;
pub mod db;

pub use builders::{PolicyBuilder, RoleBuilder};
pub use db::TestDb;
