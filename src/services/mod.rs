pub mod identity;

pub use identity::{IdentityResolver, JwtIdentityResolver};
