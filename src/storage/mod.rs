// 存储模块
// 插件目录、安装目录与文件系统辅助

pub mod fs;
pub mod catalog;
pub mod installation;

pub use catalog::*;
pub use installation::*;
