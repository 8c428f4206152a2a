//! Authorized sessions and credential refresh.
//!
//! A session's access token is renewed every `floor(expires_in / 60)`
//! minutes by a background task owned by [`RefreshScheduler`]. Only the
//! scheduler writes token fields of an [`AuthorizedSession`].

pub mod error;
pub mod refresh;
pub mod schedule;
pub mod session;
pub mod storage;
pub mod token;

pub use error::{AuthError, AuthResult};
pub use refresh::{RefreshScheduler, TokenRefresher};
pub use schedule::RefreshInterval;
pub use session::{AuthorizedSession, GrantType};
pub use storage::{InMemorySessionStorage, SessionStorage};
pub use token::{TokenClient, TokenEndpoint, TokenMethod, TokenRequest, TokenResponse};
