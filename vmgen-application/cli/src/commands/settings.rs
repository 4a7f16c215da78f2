//! 配置文件命令

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use vmgen_orchestrator::ConvertConfig;

use super::common;

pub fn handle(config_path: Option<&str>, action: crate::ConfigAction) -> Result<()> {
    match action {
        crate::ConfigAction::Show { format } => {
            let config = common::load_config(config_path, None)?;
            let content = match format.as_str() {
                "json" => serde_json::to_string_pretty(&config)?,
                "yaml" => serde_yaml::to_string(&config)?,
                _ => toml::to_string_pretty(&config).context("序列化配置失败")?,
            };
            println!("{}", content);
            Ok(())
        }
        crate::ConfigAction::Init { output } => {
            let path = Path::new(&output);
            if path.exists() {
                anyhow::bail!("文件已存在: {}", output);
            }
            ConvertConfig::default().save_to_file(path)?;
            println!("{} 已生成默认配置: {}", "✓".green(), output);
            Ok(())
        }
    }
}
