pub mod alias;
pub mod bridge;
pub mod canonical;
pub mod config;
pub mod error;
pub mod server;
pub mod translate;

pub use alias::AliasTable;
pub use bridge::{CompletionProvider, NodeBridge};
pub use config::BridgeConfig;
pub use error::{ProxyError, Result};
pub use server::{build_router, AppState};
