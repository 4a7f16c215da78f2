//! 登记数据模型

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 默认登记资源类型（Arc 托管服务器）
pub const DEFAULT_RESOURCE_TYPE: &str = "Microsoft.HybridCompute/machines";

/// 虚拟机在云管理平面中的登记绑定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryBinding {
    /// 资源 ID
    pub resource_id: String,
    /// 资源名称（与虚拟机同名）
    pub name: String,
    /// 标签
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// 采集时间
    pub captured_at: DateTime<Utc>,
}

impl RegistryBinding {
    /// 创建新的绑定记录
    pub fn new(resource_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            name: name.into(),
            tags: BTreeMap::new(),
            captured_at: Utc::now(),
        }
    }

    /// 设置标签
    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn has_tags(&self) -> bool {
        !self.tags.is_empty()
    }
}

/// 登记客户端配置（仅透传给 az CLI）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// az 可执行文件
    #[serde(default = "default_program")]
    pub program: String,

    /// 订阅 ID
    #[serde(default)]
    pub subscription_id: Option<String>,

    /// 资源组
    #[serde(default)]
    pub resource_group: Option<String>,

    /// 区域
    #[serde(default)]
    pub location: Option<String>,

    /// 资源类型
    #[serde(default = "default_resource_type")]
    pub resource_type: String,
}

fn default_program() -> String {
    "az".to_string()
}

fn default_resource_type() -> String {
    DEFAULT_RESOURCE_TYPE.to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            subscription_id: None,
            resource_group: None,
            location: None,
            resource_type: default_resource_type(),
        }
    }
}

impl RegistryConfig {
    pub fn subscription(mut self, subscription_id: impl Into<String>) -> Self {
        self.subscription_id = Some(subscription_id.into());
        self
    }

    pub fn resource_group(mut self, resource_group: impl Into<String>) -> Self {
        self.resource_group = Some(resource_group.into());
        self
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}
