pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod dto;
pub mod error;
pub mod health;
pub mod http;
pub mod metrics;
pub mod model;
pub mod normalize;
pub mod plugin;
pub mod search;
pub mod shaper;

pub use app::{Collaborators, PansouApp};
pub use config::{AppConfig, SharedConfig};
pub use error::{PansouError, Result};
pub use model::SearchRequest;
pub use normalize::normalize;
pub use plugin::{register_global_plugin, AsyncSearchPlugin, PluginManager, PluginRegistry};
pub use search::{ChannelSource, SearchService, TelegramChannelSource};
pub use shaper::shape_response;
