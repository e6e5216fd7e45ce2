mod settings;

pub use settings::{
    OtelConfig, ServerConfig, Settings, StreamsConfig, UpstreamConfig, WebSocketConfig,
};
