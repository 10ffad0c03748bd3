// Plugin Shell Library
// 插件注册中心（服务端）与运行时加载器（宿主端）

pub mod api;
pub mod config;
pub mod errors;
pub mod health;
pub mod logging;
pub mod plugins;
pub mod services;
pub mod storage;

pub use health::*;
