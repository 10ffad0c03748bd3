// Plugin Shell Common Package
// 插件清单、目录条目等服务端与运行时共享的类型

pub mod types;
pub mod errors;

pub use types::*;
pub use errors::*;
