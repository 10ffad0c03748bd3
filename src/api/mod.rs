// API 模块
// 统一导出路由和处理器

pub mod routes;
pub mod handlers;

pub use routes::*;
