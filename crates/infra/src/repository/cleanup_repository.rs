//! # CleanupRepository
//!
//! 保持期間を過ぎた論理削除済みレコードの物理削除を支えるリポジトリ。
//!
//! ## 設計方針
//!
//! - **キーセットページング**: 対象集合はジョブ実行中にも物理削除で
//!   縮むため、OFFSET ではなく `(deleted_at, id)` のカーソルで辿る。
//!   並び順は部分インデックス `idx_users_deleted_at` と一致する
//! - **包含的カットオフ**: 「ちょうど保持期間が経過した」レコードも
//!   対象に含める（`deleted_at <= cutoff`）
//! - **単一実行の保証**: PostgreSQL のアドバイザリロックで同時実行を
//!   防ぐ。ロックはセッション単位のため、専用コネクションを
//!   ガードが保持し、解放までプールに返さない

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kiroku_domain::user::{User, UserId};
use sqlx::{PgPool, Postgres, pool::PoolConnection};
use tracing::warn;

use crate::{
    db::TxContext,
    error::InfraError,
    repository::user_repository::{UserRow, USER_COLUMNS},
};

/// クリーンアップジョブのアドバイザリロックキー
///
/// `kiroku.cleanup` を表す固定値。他のジョブとキー空間を分ける。
const CLEANUP_JOB_LOCK_KEY: i64 = 0x6b69_726f_6b75_0001;

/// 物理削除対象レコードに紐づく関連データの件数
///
/// 実際の削除は外部キーの `ON DELETE CASCADE` が行う。この件数は
/// 監査とレポートのために削除前に数える。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelatedCounts {
    pub documents: u64,
    pub comments:  u64,
}

/// 実行中クリーンアップジョブのロックガード
///
/// ガードが生きている間、他プロセスの `try_acquire_job_lock` は
/// `None` を返す。ジョブ完了時に `release` で明示的に解放する。
#[async_trait]
pub trait CleanupJobGuard: Send {
    /// ロックを解放する
    async fn release(self: Box<Self>) -> Result<(), InfraError>;
}

/// クリーンアップリポジトリトレイト
#[async_trait]
pub trait CleanupRepository: Send + Sync {
    /// カットオフ以前に論理削除されたレコードの総数を数える
    async fn count_eligible(&self, cutoff: DateTime<Utc>) -> Result<u64, InfraError>;

    /// 対象レコードを `(deleted_at, id)` 順に 1 ページ取得する
    ///
    /// `cursor` は前ページ最終レコードの `(deleted_at, id)`。
    /// `None` なら先頭から。
    async fn find_eligible_page(
        &self,
        cutoff: DateTime<Utc>,
        cursor: Option<(DateTime<Utc>, UserId)>,
        limit: i64,
    ) -> Result<Vec<User>, InfraError>;

    /// レコードに紐づく関連データの件数を数える
    async fn related_counts(&self, id: &UserId) -> Result<RelatedCounts, InfraError>;

    /// 論理削除済みレコードを物理削除する
    ///
    /// `deleted_at IS NOT NULL` をガードに含め、アクティブな行が
    /// 誤って消えることを防ぐ。関連データはカスケードで削除される。
    ///
    /// # 戻り値
    ///
    /// 行が削除された場合 `true`。既に存在しない・復元済みの場合 `false`。
    async fn hard_delete(&self, tx: &mut TxContext, id: &UserId) -> Result<bool, InfraError>;

    /// クリーンアップジョブのロック取得を試みる
    ///
    /// # 戻り値
    ///
    /// 取得できた場合はガード。別のジョブが実行中の場合 `None`。
    async fn try_acquire_job_lock(&self)
    -> Result<Option<Box<dyn CleanupJobGuard>>, InfraError>;
}

/// PostgreSQL 実装の CleanupRepository
#[derive(Debug, Clone)]
pub struct PostgresCleanupRepository {
    pool: PgPool,
}

impl PostgresCleanupRepository {
    /// 新しいリポジトリインスタンスを作成する
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CleanupRepository for PostgresCleanupRepository {
    async fn count_eligible(&self, cutoff: DateTime<Utc>) -> Result<u64, InfraError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM users WHERE deleted_at IS NOT NULL AND deleted_at <= $1",
        )
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn find_eligible_page(
        &self,
        cutoff: DateTime<Utc>,
        cursor: Option<(DateTime<Utc>, UserId)>,
        limit: i64,
    ) -> Result<Vec<User>, InfraError> {
        let rows = match cursor {
            Some((after_at, after_id)) => {
                sqlx::query_as::<_, UserRow>(&format!(
                    r#"
                    SELECT {USER_COLUMNS} FROM users
                    WHERE deleted_at IS NOT NULL
                      AND deleted_at <= $1
                      AND (deleted_at, id) > ($2, $3)
                    ORDER BY deleted_at, id
                    LIMIT $4
                    "#
                ))
                .bind(cutoff)
                .bind(after_at)
                .bind(after_id.as_uuid())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, UserRow>(&format!(
                    r#"
                    SELECT {USER_COLUMNS} FROM users
                    WHERE deleted_at IS NOT NULL
                      AND deleted_at <= $1
                    ORDER BY deleted_at, id
                    LIMIT $2
                    "#
                ))
                .bind(cutoff)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(UserRow::into_user).collect()
    }

    async fn related_counts(&self, id: &UserId) -> Result<RelatedCounts, InfraError> {
        let (documents, comments): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM documents WHERE owner_id = $1),
                (SELECT COUNT(*) FROM comments WHERE author_id = $1)
            "#,
        )
        .bind(id.as_uuid())
        .fetch_one(&self.pool)
        .await?;

        Ok(RelatedCounts {
            documents: documents.max(0) as u64,
            comments:  comments.max(0) as u64,
        })
    }

    async fn hard_delete(&self, tx: &mut TxContext, id: &UserId) -> Result<bool, InfraError> {
        let result =
            sqlx::query("DELETE FROM users WHERE id = $1 AND deleted_at IS NOT NULL")
                .bind(id.as_uuid())
                .execute(tx.conn())
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn try_acquire_job_lock(
        &self,
    ) -> Result<Option<Box<dyn CleanupJobGuard>>, InfraError> {
        // アドバイザリロックはセッション単位。ジョブ完了まで
        // コネクションをプールに返さないよう、ガードが保持する。
        let mut conn = self.pool.acquire().await?;

        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(CLEANUP_JOB_LOCK_KEY)
            .fetch_one(&mut *conn)
            .await?;

        if !acquired {
            return Ok(None);
        }

        Ok(Some(Box::new(PgCleanupJobGuard { conn })))
    }
}

/// アドバイザリロックを保持する専用コネクションのガード
struct PgCleanupJobGuard {
    conn: PoolConnection<Postgres>,
}

#[async_trait]
impl CleanupJobGuard for PgCleanupJobGuard {
    async fn release(mut self: Box<Self>) -> Result<(), InfraError> {
        let released: bool = sqlx::query_scalar("SELECT pg_advisory_unlock($1)")
            .bind(CLEANUP_JOB_LOCK_KEY)
            .fetch_one(&mut *self.conn)
            .await?;

        // コネクション切断時に PostgreSQL 側で解放済みのケース
        if !released {
            warn!("クリーンアップロックは既に解放されていた");
        }

        Ok(())
    }
}
