//! CLI 命令处理模块

pub mod backup;
pub mod batch;
pub mod common; // 公共工具函数
pub mod convert;
pub mod inventory;
pub mod output;
pub mod report;
pub mod settings; // 配置文件
