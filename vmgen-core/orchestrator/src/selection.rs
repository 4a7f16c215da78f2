//! 候选虚拟机选择
//!
//! 未显式指定虚拟机时，从快照中的一代虚拟机里选择本次要转换的子集。

use std::collections::BTreeSet;

use crate::snapshot::InventoryRow;
use crate::{OrchestratorError, Result};

/// 候选选择器
pub trait CandidateSelector: Send + Sync {
    /// 从候选列表中选择要转换的虚拟机名称
    ///
    /// 候选列表只包含一代虚拟机，且不会为空
    fn select(&self, candidates: &[InventoryRow]) -> Result<Vec<String>>;
}

/// 选择全部候选
pub struct AllCandidates;

impl CandidateSelector for AllCandidates {
    fn select(&self, candidates: &[InventoryRow]) -> Result<Vec<String>> {
        Ok(candidates.iter().map(|row| row.name.clone()).collect())
    }
}

/// 交互式选择器：通过回调函数询问用户
pub struct InteractiveCandidateSelector<F>
where
    F: Fn(&[InventoryRow]) -> Result<Vec<String>> + Send + Sync,
{
    selector_fn: F,
}

impl<F> InteractiveCandidateSelector<F>
where
    F: Fn(&[InventoryRow]) -> Result<Vec<String>> + Send + Sync,
{
    pub fn new(selector_fn: F) -> Self {
        Self { selector_fn }
    }
}

impl<F> CandidateSelector for InteractiveCandidateSelector<F>
where
    F: Fn(&[InventoryRow]) -> Result<Vec<String>> + Send + Sync,
{
    fn select(&self, candidates: &[InventoryRow]) -> Result<Vec<String>> {
        (self.selector_fn)(candidates)
    }
}

/// 解析用户输入的选择
///
/// 支持 `all`、逗号分隔的序号 (`1,3`) 和区间 (`2-4`)，序号从 1 开始。
/// 返回去重后按升序排列的 0 基索引。
pub fn parse_selection(input: &str, count: usize) -> Result<Vec<usize>> {
    let input = input.trim();
    if input.eq_ignore_ascii_case("all") || input == "*" {
        return Ok((0..count).collect());
    }

    let invalid = |part: &str| OrchestratorError::InvalidSelection(part.to_string());
    let parse_index = |s: &str| -> Result<usize> {
        let n: usize = s.trim().parse().map_err(|_| invalid(s))?;
        if n == 0 || n > count {
            return Err(OrchestratorError::InvalidSelection(format!(
                "{} 超出范围 1-{}",
                n, count
            )));
        }
        Ok(n - 1)
    };

    let mut selected = BTreeSet::new();
    for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((start, end)) => {
                let (start, end) = (parse_index(start)?, parse_index(end)?);
                if start > end {
                    return Err(invalid(part));
                }
                selected.extend(start..=end);
            }
            None => {
                selected.insert(parse_index(part)?);
            }
        }
    }

    if selected.is_empty() {
        return Err(OrchestratorError::InvalidSelection("未选择任何虚拟机".to_string()));
    }

    Ok(selected.into_iter().collect())
}
