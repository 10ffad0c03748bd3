// 服务层模块
// 插件注册中心与插件包导入

pub mod ingestion;
pub mod registry;

pub use ingestion::*;
pub use registry::*;
