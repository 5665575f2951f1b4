//! Identity, session domains and authorization for the clock and hub frontends.
//! Keep the public surface thin and split implementation across sub-modules.

pub mod app_type;
mod principal;
mod session;
mod provider;
mod request_context;
mod authorizer;
mod time;

pub use app_type::{AppType, ClientSignals, OriginHints, LEGACY_COOKIE};
pub use principal::Principal;
pub use session::{gen_token, Session, SessionConfig, SessionData, SessionStore, SameSite};
pub use provider::{AccessCodeAuthenticator, AccessCodeBackend, AuthBackend, AuthOutcome};
pub use request_context::RequestContext;
pub use authorizer::{Capability, Policy};
pub use time::{ManualTimeSource, SystemTimeSource, TimeSource};
