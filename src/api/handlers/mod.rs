// API 处理器模块

pub mod plugin;
pub mod runtime;
