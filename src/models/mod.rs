pub mod context;
pub mod event;
pub mod rule;
pub mod session;

pub use context::{CaptureDecision, ContextSnapshot};
pub use event::{ActivityChangeEvent, ActivityKind, CapturedEvent, ScreenshotEvent};
pub use rule::{AllowlistRule, RuleKind, RuleSet};
pub use session::{RemoteSession, SessionState};
