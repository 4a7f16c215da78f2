//! VmGen 云管理平面登记客户端
//!
//! 提供虚拟机登记绑定的查询与维护能力，支持：
//! - 按虚拟机名称查询登记资源及其标签
//! - 删除登记资源（重建前避免名称冲突）
//! - 重建后增量重新应用标签
//! - 自动登记超时后的手动登记指引
//!
//! # 示例
//!
//! ```ignore
//! use vmgen_registry::{AzCliRegistry, RegistryClient, RegistryConfig};
//!
//! let registry = AzCliRegistry::local(
//!     RegistryConfig::default().resource_group("rg-prod"),
//! );
//!
//! if let Some(binding) = registry.find_binding("Web01").await? {
//!     println!("资源: {}, 标签: {:?}", binding.resource_id, binding.tags);
//! }
//! ```

mod client;
mod error;
mod models;
mod parser;

pub use client::{AzCliRegistry, RegistryClient};
pub use error::{RegistryError, Result};
pub use models::{RegistryBinding, RegistryConfig, DEFAULT_RESOURCE_TYPE};
