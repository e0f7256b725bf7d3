//! # AuditLogRepository
//!
//! 監査ログの永続化を担当するリポジトリ。
//!
//! ## 設計方針
//!
//! - **追記専用**: INSERT と参照のみを提供し、更新・削除の操作は
//!   トレイトに存在しない
//! - **状態変更と同一トランザクション**: `record` は `TxContext` を
//!   受け取る。レコードの状態変更 UPDATE と監査 INSERT は常に同じ
//!   トランザクションでコミットされ、片方だけが残ることはない
//! - **自己参照の排除**: このリポジトリ自体は users テーブルに
//!   触れないため、監査の書き込みがさらに監査を生む再帰は構造上
//!   発生しない

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kiroku_domain::{
    actor::ActorId,
    audit::{AuditAction, AuditLogEntry, AuditMetadata},
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{db::TxContext, error::InfraError};

/// 監査ログリポジトリトレイト
#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    /// 監査ログエントリを記録する
    ///
    /// 対応する状態変更と同じトランザクションで呼び出すこと。
    async fn record(&self, tx: &mut TxContext, entry: &AuditLogEntry) -> Result<(), InfraError>;

    /// 対象のレコードに紐づく監査ログを時系列順に取得する
    async fn find_by_target(
        &self,
        target_id: &str,
        target_type: &str,
    ) -> Result<Vec<AuditLogEntry>, InfraError>;
}

/// audit_logs テーブルの行
#[derive(sqlx::FromRow)]
struct AuditLogRow {
    id:          Uuid,
    actor_id:    Option<String>,
    target_id:   String,
    target_type: String,
    action:      String,
    metadata:    serde_json::Value,
    ip_address:  Option<String>,
    user_agent:  Option<String>,
    created_at:  DateTime<Utc>,
}

impl AuditLogRow {
    fn into_entry(self) -> Result<AuditLogEntry, InfraError> {
        let action = AuditAction::from_str(&self.action)
            .map_err(InfraError::corrupted_row)?;
        let metadata: AuditMetadata = serde_json::from_value(self.metadata)?;

        Ok(AuditLogEntry {
            id: self.id,
            actor_id: self.actor_id.map(ActorId::new),
            target_id: self.target_id,
            target_type: self.target_type,
            action,
            metadata,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            created_at: self.created_at,
        })
    }
}

/// PostgreSQL 実装の AuditLogRepository
#[derive(Debug, Clone)]
pub struct PostgresAuditLogRepository {
    pool: PgPool,
}

impl PostgresAuditLogRepository {
    /// 新しいリポジトリインスタンスを作成する
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLogRepository for PostgresAuditLogRepository {
    async fn record(&self, tx: &mut TxContext, entry: &AuditLogEntry) -> Result<(), InfraError> {
        let metadata = serde_json::to_value(&entry.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO audit_logs
                (id, actor_id, target_id, target_type, action, metadata,
                 ip_address, user_agent, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.id)
        .bind(entry.actor_id.as_ref().map(ActorId::as_str))
        .bind(&entry.target_id)
        .bind(&entry.target_type)
        .bind(entry.action.to_string())
        .bind(metadata)
        .bind(entry.ip_address.as_deref())
        .bind(entry.user_agent.as_deref())
        .bind(entry.created_at)
        .execute(tx.conn())
        .await?;

        Ok(())
    }

    async fn find_by_target(
        &self,
        target_id: &str,
        target_type: &str,
    ) -> Result<Vec<AuditLogEntry>, InfraError> {
        let rows = sqlx::query_as::<_, AuditLogRow>(
            r#"
            SELECT id, actor_id, target_id, target_type, action, metadata,
                   ip_address, user_agent, created_at
            FROM audit_logs
            WHERE target_id = $1 AND target_type = $2
            ORDER BY created_at
            "#,
        )
        .bind(target_id)
        .bind(target_type)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AuditLogRow::into_entry).collect()
    }
}
