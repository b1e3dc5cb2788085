pub mod flow;
pub mod github;
pub mod guard;
pub mod provider;
pub mod retry;
pub mod session;

pub use flow::{AuthError, AuthFlow, CallbackParams};
pub use guard::{require_authenticated, AuthDecision, DenyReason, RequestKind};
pub use session::{Session, SessionKey, SessionUser};
