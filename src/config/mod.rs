//! Configuration: types (§3), environment overlay (§6.2), and the loader (§4.12).

pub mod env;
pub mod loader;
pub mod types;

pub use types::{
    BehaviorConfig, EngineKind, GlobalConfig, NetworkConfig, PaginationConfig, PaginationMode,
    RetryConfig, RuntimeConfig, Selectors, SiteConfig, SiteLimits, StopCondition, WaitCondition,
};
