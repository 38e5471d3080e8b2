//! Authentication for the Parley gateway

pub mod accounts;
pub mod gateway;
pub mod jwt;
pub mod middleware;
pub mod password;

pub use accounts::AccountStore;
pub use gateway::{AuthGateway, AuthUser};
pub use jwt::{Claims, IssuedToken, JwtError, JwtManager};
pub use middleware::{optional_auth, require_auth, MaybeUser};
pub use password::{hash_password, validate_password, verify_password};
