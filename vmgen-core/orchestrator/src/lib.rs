//! VmGen 编排器
//!
//! Hyper-V 一代虚拟机到二代虚拟机的转换编排:
//!
//! - [`GenerationConverter`]: 单台虚拟机的转换状态机
//! - [`BatchOrchestrator`]: 基于配置快照的批量执行（候选选择、预检、顺序执行、汇总报告）
//! - [`SnapshotStore`]: 清单与单台虚拟机配置快照
//! - [`poll_until`]: 心跳与登记等待共用的有界轮询

pub mod batch;
pub mod config;
pub mod converter;
pub mod job;
pub mod poll;
pub mod preflight;
pub mod report;
pub mod selection;
pub mod snapshot;
pub mod state;

pub use batch::{BatchOptions, BatchOrchestrator};
pub use config::{ConvertConfig, DatabaseConfig, HypervisorConfig, TimingConfig};
pub use converter::{CapturedConfiguration, ConverterSettings, GenerationConverter};
pub use job::ConversionJob;
pub use poll::{poll_until, Clock, ManualClock, PollOutcome, PollPolicy, TokioClock};
pub use preflight::{check_live, SkipReason};
pub use report::{
    BatchReport, ConversionResult, ConversionStatus, Diagnostic, Severity, SkippedVm,
};
pub use selection::{parse_selection, AllCandidates, CandidateSelector, InteractiveCandidateSelector};
pub use snapshot::{Inventory, InventoryRow, SnapshotStore, VmAttributes, VmSnapshot};
pub use state::ConversionStage;

use std::path::PathBuf;

use thiserror::Error;

/// 编排器错误类型
///
/// 单台转换的失败体现在 [`ConversionResult`] 中，这里只覆盖批量执行无法开始的情况
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("虚拟化操作失败: {0}")]
    Hypervisor(#[from] vmgen_hypervisor::HypervisorError),

    #[error("登记操作失败: {0}")]
    Registry(#[from] vmgen_registry::RegistryError),

    #[error("存储错误: {0}")]
    Storage(#[from] vmgen_storage::StorageError),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("工作目录 {0} 下没有配置快照，请先执行 inventory export")]
    SnapshotNotFound(PathBuf),

    #[error("快照错误: {0}")]
    Snapshot(String),

    #[error("无效的选择: {0}")]
    InvalidSelection(String),

    #[error("配置错误: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
