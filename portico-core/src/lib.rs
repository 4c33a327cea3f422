pub mod config;
pub mod error;
pub mod rule;
pub mod rules;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use rule::{CompiledRule, FragmentConfig, Rule};
pub use rules::{RuleMatch, RuleStore};
