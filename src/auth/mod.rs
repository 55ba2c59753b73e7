//! Authentication for the REST surface
//!
//! Requests carry an HS256 JWT bearer token naming the acting user.

pub mod jwt;

pub use jwt::{bearer_token, Claims, JwtValidator, TokenInput};
