use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{Result, StorageError};

/// 备份清单文件名
const MANIFEST_FILE: &str = "manifest.json";

/// 单个已备份文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackedUpFile {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub size_bytes: u64,
}

/// 一次虚拟机磁盘备份
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskBackup {
    pub vm_name: String,
    pub directory: PathBuf,
    pub created_at: DateTime<Utc>,
    pub files: Vec<BackedUpFile>,
}

impl DiskBackup {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size_bytes).sum()
    }
}

/// 虚拟机磁盘备份管理器
///
/// 目录结构: `<root>/<vm>/<timestamp>/`，每个目录带一份 `manifest.json`
pub struct DiskBackupManager {
    root: PathBuf,
}

impl DiskBackupManager {
    /// 创建备份管理器
    ///
    /// # 参数
    /// - `root`: 备份根目录
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 逐字节复制虚拟机的全部磁盘文件
    ///
    /// 任一文件复制失败即返回错误，已复制的部分保留在备份目录中
    pub async fn backup_disks(&self, vm_name: &str, sources: &[PathBuf]) -> Result<DiskBackup> {
        let created_at = Utc::now();
        let directory = self
            .root
            .join(vm_name)
            .join(created_at.format("%Y%m%d_%H%M%S_%3f").to_string());

        fs::create_dir_all(&directory)
            .await
            .map_err(|e| StorageError::io(&directory, e))?;

        info!(
            "备份虚拟机 {} 的 {} 个磁盘到: {}",
            vm_name,
            sources.len(),
            directory.display()
        );

        let mut used_names = HashSet::new();
        let mut files = Vec::with_capacity(sources.len());

        for (index, source) in sources.iter().enumerate() {
            let file_name = source
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| StorageError::NotFound(format!("无效的磁盘路径: {}", source.display())))?;

            // 不同目录下的同名磁盘加序号区分，生成的名称同样登记
            let file_name = unique_name(&mut used_names, &file_name, index);

            let destination = directory.join(&file_name);
            let size_bytes = fs::copy(source, &destination)
                .await
                .map_err(|e| StorageError::io(source, e))?;

            debug!(
                "已复制 {} -> {} ({} 字节)",
                source.display(),
                destination.display(),
                size_bytes
            );

            files.push(BackedUpFile {
                source: source.clone(),
                destination,
                size_bytes,
            });
        }

        let backup = DiskBackup {
            vm_name: vm_name.to_string(),
            directory,
            created_at,
            files,
        };

        let manifest = backup.directory.join(MANIFEST_FILE);
        fs::write(&manifest, serde_json::to_vec_pretty(&backup)?)
            .await
            .map_err(|e| StorageError::io(&manifest, e))?;

        info!(
            "虚拟机 {} 备份完成, 共 {} 字节",
            vm_name,
            backup.total_bytes()
        );

        Ok(backup)
    }

    /// 校验备份：每个文件存在且大小与源文件一致
    pub async fn verify(&self, backup: &DiskBackup) -> Result<()> {
        for file in &backup.files {
            let meta = fs::metadata(&file.destination).await.map_err(|_| {
                StorageError::VerificationError(format!(
                    "备份文件不存在: {}",
                    file.destination.display()
                ))
            })?;

            if meta.len() != file.size_bytes {
                return Err(StorageError::VerificationError(format!(
                    "备份文件大小不一致: {} ({} != {})",
                    file.destination.display(),
                    meta.len(),
                    file.size_bytes
                )));
            }

            match fs::metadata(&file.source).await {
                Ok(source_meta) if source_meta.len() != meta.len() => {
                    return Err(StorageError::VerificationError(format!(
                        "备份与源文件大小不一致: {} ({} != {})",
                        file.source.display(),
                        source_meta.len(),
                        meta.len()
                    )));
                }
                Ok(_) => {}
                Err(e) => warn!("无法读取源文件 {}: {}", file.source.display(), e),
            }
        }

        debug!("备份校验通过: {}", backup.directory.display());
        Ok(())
    }

    /// 列出备份（按时间倒序）
    ///
    /// # 参数
    /// - `vm_name`: 只列出指定虚拟机的备份
    pub async fn list(&self, vm_name: Option<&str>) -> Result<Vec<DiskBackup>> {
        let mut backups = Vec::new();

        let vm_dirs = match vm_name {
            Some(name) => vec![self.root.join(name)],
            None => sub_directories(&self.root).await?,
        };

        for vm_dir in vm_dirs {
            for backup_dir in sub_directories(&vm_dir).await? {
                let manifest = backup_dir.join(MANIFEST_FILE);
                let content = match fs::read(&manifest).await {
                    Ok(content) => content,
                    Err(_) => {
                        warn!("跳过缺少清单的备份目录: {}", backup_dir.display());
                        continue;
                    }
                };
                match serde_json::from_slice::<DiskBackup>(&content) {
                    Ok(backup) => backups.push(backup),
                    Err(e) => warn!("备份清单解析失败 {}: {}", manifest.display(), e),
                }
            }
        }

        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(backups)
    }
}

/// 备份目录内唯一的文件名
fn unique_name(used: &mut HashSet<String>, file_name: &str, index: usize) -> String {
    if used.insert(file_name.to_string()) {
        return file_name.to_string();
    }

    let mut n = index;
    loop {
        let candidate = format!("{}_{}", n, file_name);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

async fn sub_directories(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();

    if !fs::try_exists(dir).await.unwrap_or(false) {
        return Ok(dirs);
    }

    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| StorageError::io(dir, e))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StorageError::io(dir, e))?
    {
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }

    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn disk(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_backup_copies_bytes() {
        let source_dir = TempDir::new().unwrap();
        let backup_root = TempDir::new().unwrap();
        let manager = DiskBackupManager::new(backup_root.path());

        let boot = disk(source_dir.path(), "web01.vhd", b"legacy-disk").await;
        let data = disk(source_dir.path(), "data.vhdx", b"data").await;

        let backup = manager
            .backup_disks("Web01", &[boot.clone(), data])
            .await
            .unwrap();

        assert_eq!(backup.files.len(), 2);
        assert!(backup.directory.starts_with(backup_root.path().join("Web01")));
        assert_eq!(
            fs::read(&backup.files[0].destination).await.unwrap(),
            b"legacy-disk"
        );
        assert_eq!(backup.total_bytes(), 15);
        manager.verify(&backup).await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_file_names() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let manager = DiskBackupManager::new(root.path());

        let first = disk(a.path(), "disk.vhdx", b"a").await;
        let second = disk(b.path(), "disk.vhdx", b"bb").await;

        let backup = manager.backup_disks("Db01", &[first, second]).await.unwrap();
        assert_ne!(backup.files[0].destination, backup.files[1].destination);
        manager.verify(&backup).await.unwrap();
    }

    #[tokio::test]
    async fn test_generated_name_does_not_collide_with_later_disk() {
        let src = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let manager = DiskBackupManager::new(root.path());

        for dir in ["x", "y", "z"] {
            fs::create_dir_all(src.path().join(dir)).await.unwrap();
        }
        let boot = disk(&src.path().join("x"), "a.vhd", b"AAAA-boot").await;
        let data = disk(&src.path().join("y"), "a.vhd", b"BBBB-data").await;
        let other = disk(&src.path().join("z"), "1_a.vhd", b"CCCC-othr").await;

        let backup = manager
            .backup_disks("Web01", &[boot, data, other])
            .await
            .unwrap();

        let destinations: HashSet<_> = backup.files.iter().map(|f| &f.destination).collect();
        assert_eq!(destinations.len(), 3);

        let expected: [&[u8]; 3] = [b"AAAA-boot", b"BBBB-data", b"CCCC-othr"];
        for (file, content) in backup.files.iter().zip(expected) {
            assert_eq!(fs::read(&file.destination).await.unwrap(), content);
        }
        manager.verify(&backup).await.unwrap();
    }

    #[test]
    fn test_unique_name_skips_taken_candidates() {
        let mut used = HashSet::new();
        assert_eq!(unique_name(&mut used, "a.vhd", 0), "a.vhd");
        assert_eq!(unique_name(&mut used, "a.vhd", 1), "1_a.vhd");
        assert_eq!(unique_name(&mut used, "1_a.vhd", 2), "2_1_a.vhd");
        assert_eq!(unique_name(&mut used, "a.vhd", 1), "2_a.vhd");
    }

    #[tokio::test]
    async fn test_missing_source_fails() {
        let root = TempDir::new().unwrap();
        let manager = DiskBackupManager::new(root.path());

        let result = manager
            .backup_disks("Web01", &[root.path().join("missing.vhd")])
            .await;
        assert!(matches!(result, Err(StorageError::IoError { .. })));
    }

    #[tokio::test]
    async fn test_verify_detects_truncation() {
        let source_dir = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let manager = DiskBackupManager::new(root.path());

        let boot = disk(source_dir.path(), "web01.vhd", b"0123456789").await;
        let backup = manager.backup_disks("Web01", &[boot]).await.unwrap();

        fs::write(&backup.files[0].destination, b"0123").await.unwrap();
        assert!(matches!(
            manager.verify(&backup).await,
            Err(StorageError::VerificationError(_))
        ));
    }

    #[tokio::test]
    async fn test_list_backups() {
        let source_dir = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let manager = DiskBackupManager::new(root.path());

        let boot = disk(source_dir.path(), "web01.vhd", b"x").await;
        manager.backup_disks("Web01", &[boot.clone()]).await.unwrap();
        manager.backup_disks("App01", &[boot]).await.unwrap();

        assert_eq!(manager.list(None).await.unwrap().len(), 2);
        let web = manager.list(Some("Web01")).await.unwrap();
        assert_eq!(web.len(), 1);
        assert_eq!(web[0].vm_name, "Web01");
        assert!(manager.list(Some("Ghost")).await.unwrap().is_empty());
    }
}
