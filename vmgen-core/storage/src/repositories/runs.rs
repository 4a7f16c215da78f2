use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{Result, StorageError};
use crate::models::{BatchRunRecord, ConversionRecord, RunFilter, SkippedRecord};

/// 转换历史仓储
pub struct RunRepository {
    pool: SqlitePool,
}

enum Binding {
    Text(String),
    Time(DateTime<Utc>),
}

impl RunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 创建批次记录
    pub async fn create_run(&self, run: &BatchRunRecord) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO conversion_runs
            (run_uuid, started_at, finished_at, total, succeeded, failed, skipped, dry_run, report_path)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.run_uuid)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.total)
        .bind(run.succeeded)
        .bind(run.failed)
        .bind(run.skipped)
        .bind(run.dry_run)
        .bind(&run.report_path)
        .execute(&self.pool)
        .await?;

        let run_id = result.last_insert_rowid();
        debug!("Created conversion run with ID: {}", run_id);

        Ok(run_id)
    }

    /// 创建单台虚拟机结果
    pub async fn create_result(&self, record: &ConversionRecord) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO conversion_results
            (run_id, vm_name, status, stage, duration_ms, error, completed_at, diagnostics)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.run_id)
        .bind(&record.vm_name)
        .bind(&record.status)
        .bind(&record.stage)
        .bind(record.duration_ms)
        .bind(&record.error)
        .bind(record.completed_at)
        .bind(&record.diagnostics)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// 批量创建结果
    pub async fn create_results(&self, records: &[ConversionRecord]) -> Result<()> {
        for record in records {
            self.create_result(record).await?;
        }
        Ok(())
    }

    /// 创建跳过记录
    pub async fn create_skipped(&self, record: &SkippedRecord) -> Result<i64> {
        let result = sqlx::query("INSERT INTO skipped_vms (run_id, vm_name, reason) VALUES (?, ?, ?)")
            .bind(record.run_id)
            .bind(&record.vm_name)
            .bind(&record.reason)
            .execute(&self.pool)
            .await?;

        Ok(result.last_insert_rowid())
    }

    /// 根据ID获取批次
    pub async fn get_run(&self, id: i64) -> Result<Option<BatchRunRecord>> {
        let run = sqlx::query_as::<_, BatchRunRecord>(
            r#"
            SELECT id, run_uuid, started_at, finished_at, total, succeeded, failed, skipped,
                   dry_run, report_path, created_at
            FROM conversion_runs
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(run)
    }

    /// 获取批次的全部结果（按完成时间）
    pub async fn get_results(&self, run_id: i64) -> Result<Vec<ConversionRecord>> {
        let results = sqlx::query_as::<_, ConversionRecord>(
            r#"
            SELECT id, run_id, vm_name, status, stage, duration_ms, error, completed_at, diagnostics
            FROM conversion_results
            WHERE run_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(results)
    }

    /// 获取批次的跳过记录
    pub async fn get_skipped(&self, run_id: i64) -> Result<Vec<SkippedRecord>> {
        let skipped = sqlx::query_as::<_, SkippedRecord>(
            "SELECT id, run_id, vm_name, reason FROM skipped_vms WHERE run_id = ? ORDER BY id ASC",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(skipped)
    }

    /// 虚拟机最近一次转换结果
    pub async fn latest_result_for_vm(&self, vm_name: &str) -> Result<Option<ConversionRecord>> {
        let record = sqlx::query_as::<_, ConversionRecord>(
            r#"
            SELECT id, run_id, vm_name, status, stage, duration_ms, error, completed_at, diagnostics
            FROM conversion_results
            WHERE vm_name = ?
            ORDER BY completed_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(vm_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    fn filter_clause(filter: &RunFilter, query: &mut String, bindings: &mut Vec<Binding>) {
        if let Some(vm_name) = &filter.vm_name {
            query.push_str(
                " AND (id IN (SELECT run_id FROM conversion_results WHERE vm_name = ?) \
                 OR id IN (SELECT run_id FROM skipped_vms WHERE vm_name = ?))",
            );
            bindings.push(Binding::Text(vm_name.clone()));
            bindings.push(Binding::Text(vm_name.clone()));
        }

        match filter.has_failures {
            Some(true) => query.push_str(" AND failed > 0"),
            Some(false) => query.push_str(" AND failed = 0"),
            None => {}
        }

        if let Some(from) = filter.started_from {
            query.push_str(" AND started_at >= ?");
            bindings.push(Binding::Time(from));
        }

        if let Some(to) = filter.started_to {
            query.push_str(" AND started_at <= ?");
            bindings.push(Binding::Time(to));
        }
    }

    /// 查询批次列表
    pub async fn list(&self, filter: &RunFilter) -> Result<Vec<BatchRunRecord>> {
        let mut query = String::from(
            r#"
            SELECT id, run_uuid, started_at, finished_at, total, succeeded, failed, skipped,
                   dry_run, report_path, created_at
            FROM conversion_runs
            WHERE 1=1
            "#,
        );

        let mut bindings = Vec::new();
        Self::filter_clause(filter, &mut query, &mut bindings);

        query.push_str(" ORDER BY started_at DESC, id DESC");

        if let Some(limit) = filter.limit {
            query.push_str(&format!(" LIMIT {}", limit));
        }

        if let Some(offset) = filter.offset {
            if filter.limit.is_none() {
                query.push_str(" LIMIT -1");
            }
            query.push_str(&format!(" OFFSET {}", offset));
        }

        let mut sql_query = sqlx::query_as::<_, BatchRunRecord>(&query);

        for binding in bindings {
            sql_query = match binding {
                Binding::Text(s) => sql_query.bind(s),
                Binding::Time(t) => sql_query.bind(t),
            };
        }

        let runs = sql_query.fetch_all(&self.pool).await?;

        Ok(runs)
    }

    /// 删除批次(级联删除结果和跳过记录)
    pub async fn delete(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM conversion_runs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("Run {} not found", id)));
        }

        debug!("Deleted conversion run {}", id);

        Ok(())
    }

    /// 获取批次总数
    pub async fn count(&self, filter: &RunFilter) -> Result<i64> {
        let mut query = String::from("SELECT COUNT(*) FROM conversion_runs WHERE 1=1");

        let mut bindings = Vec::new();
        Self::filter_clause(filter, &mut query, &mut bindings);

        let mut sql_query = sqlx::query_as::<_, (i64,)>(&query);

        for binding in bindings {
            sql_query = match binding {
                Binding::Text(s) => sql_query.bind(s),
                Binding::Time(t) => sql_query.bind(t),
            };
        }

        let (count,) = sql_query.fetch_one(&self.pool).await?;

        Ok(count)
    }
}
