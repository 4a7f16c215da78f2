//! az CLI 输出解析

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::debug;

use crate::error::{RegistryError, Result};
use crate::models::RegistryBinding;

/// `az resource list -o json` 的单个条目（只取用到的字段）
#[derive(Debug, Deserialize)]
struct AzResource {
    id: String,
    name: String,
    #[serde(default)]
    tags: Option<BTreeMap<String, String>>,
}

/// 从资源列表中找出与名称匹配的绑定（名称不区分大小写）
pub fn parse_resource_list(output: &str, name: &str) -> Result<Option<RegistryBinding>> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let resources: Vec<AzResource> = serde_json::from_str(trimmed)
        .map_err(|e| RegistryError::ParseError(format!("资源列表 JSON 解析失败: {}", e)))?;

    debug!("az 返回 {} 个资源", resources.len());

    Ok(resources
        .into_iter()
        .find(|r| r.name.eq_ignore_ascii_case(name))
        .map(|r| {
            RegistryBinding::new(r.id, r.name).with_tags(r.tags.unwrap_or_default())
        }))
}

/// 判断 az 错误输出是否为未登录
pub fn is_not_logged_in(stderr: &str) -> bool {
    stderr.contains("az login") || stderr.contains("Please run 'az login'")
}

/// 判断 az 错误输出是否为资源不存在
pub fn is_resource_not_found(stderr: &str) -> bool {
    stderr.contains("ResourceNotFound") || stderr.contains("could not be found")
}

/// 标签转换为 `key=value` 参数
pub fn format_tags(tags: &BTreeMap<String, String>) -> Vec<String> {
    tags.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
}
