pub mod config;
pub mod matcher;
pub mod text;

pub use config::{EmptyRuleSetPolicy, MatchConfig};
pub use matcher::{match_context, Matcher};
