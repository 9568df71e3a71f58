pub mod jwt;
pub mod password;
pub mod verification;

pub use jwt::{AccessTokenIssuer, Claims, JwtIssuer, JwtSettings, Lifetime};
pub use password::{Argon2PasswordHasher, HashedPassword, PasswordHasher, PasswordSettings};
pub use verification::{VerificationTokenService, VerificationTokenSettings, VerificationTokens};
