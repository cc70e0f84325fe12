pub mod access_request;
pub mod auth;
pub mod common;
pub mod dependency;
pub mod entity;
pub mod group;
pub mod identity;
pub mod issue;
pub mod organization;
pub mod role;

pub use access_request::*;
pub use auth::*;
pub use common::*;
pub use dependency::*;
pub use entity::*;
pub use group::*;
pub use identity::*;
pub use issue::*;
pub use organization::*;
pub use role::*;
