//! Login and access control.
//!
//! Identity comes from the OpenID Connect provider; after the callback the
//! user's identity travels in an HMAC-signed cookie, and every protected
//! request checks it against the e-mail allow-list again.

use serde::{Deserialize, Serialize};

mod allowlist;
pub mod cookie;
mod extract;
pub mod oidc;

pub use allowlist::EmailAllowList;
pub use cookie::{CookieError, CookieSigner, LoginState};
pub use extract::{AuthRejection, CurrentUser};
pub use oidc::{IdTokenClaims, OidcClient, OidcConfig, OidcError, ProviderMetadata};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub picture: String,
}
