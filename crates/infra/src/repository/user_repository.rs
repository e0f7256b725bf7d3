//! # UserRepository
//!
//! 論理削除対応のユーザー永続化を担当するリポジトリ。
//!
//! ## 設計方針
//!
//! - **デフォルトは安全側**: `find_active_*` は常に `deleted_at IS NULL`
//!   を条件に含む。論理削除済み行が見えるのは `_any` 系を明示的に
//!   呼んだ場合だけ（管理ツール向けの脱出ハッチ）
//! - **主キー検索も 1 クエリ**: PostgreSQL は「主キー一致 AND 未削除」を
//!   単一のインデックス参照で表現できるため、取得後フィルタは行わない
//! - **ガード付き UPDATE**: `soft_delete` は `deleted_at IS NULL`、
//!   `restore` は `deleted_at IS NOT NULL` を WHERE に含め、
//!   再スタンプ・二重復元を行レベルで防ぐ
//! - **書き込みは TxContext 必須**: 監査ログ書き込みと同一
//!   トランザクションに入ることを型で強制する

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kiroku_domain::{
    actor::ActorId,
    audit::FilterShape,
    user::{DeletionStamp, Email, User, UserId, UserName},
};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{db::TxContext, error::InfraError};

/// 一括論理削除の対象を絞り込むフィルタ
///
/// 述語はすべて任意。いずれの場合も実際の UPDATE には
/// `deleted_at IS NULL` が追加され、削除済み行が再スタンプされる
/// ことはない。
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    /// 名前の部分一致
    pub name_contains:  Option<String>,
    /// 作成日時がこの値より前
    pub created_before: Option<DateTime<Utc>>,
}

impl UserFilter {
    /// 監査メタデータ用のフィルタ形状を返す
    ///
    /// 利用者入力（`name_contains` の中身）は記録しない。
    pub fn shape(&self) -> FilterShape {
        FilterShape {
            name_contains:  self.name_contains.is_some(),
            created_before: self.created_before,
        }
    }

    /// フィルタがユーザーに一致するか判定する
    ///
    /// SQL 実装と同じ述語のインメモリ版。モックリポジトリが使用する。
    pub fn matches(&self, user: &User) -> bool {
        if let Some(name) = &self.name_contains {
            if !user.name().as_str().contains(name.as_str()) {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if user.created_at() >= before {
                return false;
            }
        }
        true
    }
}

/// ユーザーリポジトリトレイト
///
/// 論理削除を意識した永続化操作を定義する。
/// 削除系・参照系の透過的な書き換えは行わず、呼び出し側が
/// どの可視性で操作しているかをメソッド名で明示する。
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// ユーザーを挿入する
    async fn insert(&self, tx: &mut TxContext, user: &User) -> Result<(), InfraError>;

    /// ID でアクティブなユーザーを検索する
    ///
    /// 論理削除済みの行は「見つからない」として扱う。
    async fn find_active_by_id(&self, id: &UserId) -> Result<Option<User>, InfraError>;

    /// ID でユーザーを検索する（論理削除済みを含む）
    ///
    /// 管理ツール・復元前チェック向けの脱出ハッチ。
    async fn find_by_id_any(&self, id: &UserId) -> Result<Option<User>, InfraError>;

    /// アクティブなユーザー一覧を取得する
    async fn find_all_active(&self) -> Result<Vec<User>, InfraError>;

    /// 全ユーザー一覧を取得する（論理削除済みを含む）
    async fn find_all_any(&self) -> Result<Vec<User>, InfraError>;

    /// ユーザーを論理削除する
    ///
    /// `deleted_at IS NULL` の行だけを対象にスタンプを設定する。
    ///
    /// # 戻り値
    ///
    /// 行が遷移した場合 `true`。存在しない・既に削除済みの場合 `false`。
    async fn soft_delete(
        &self,
        tx: &mut TxContext,
        id: &UserId,
        deleted_by: &ActorId,
        now: DateTime<Utc>,
    ) -> Result<bool, InfraError>;

    /// フィルタに一致するアクティブなユーザーを一括論理削除する
    ///
    /// 述語には常に `deleted_at IS NULL` が追加される。
    ///
    /// # 戻り値
    ///
    /// スタンプを設定した行数。
    async fn soft_delete_many(
        &self,
        tx: &mut TxContext,
        filter: &UserFilter,
        deleted_by: &ActorId,
        now: DateTime<Utc>,
    ) -> Result<u64, InfraError>;

    /// 論理削除済みユーザーを復元する
    ///
    /// `deleted_at` / `deleted_by` を 1 回の UPDATE で同時にクリアする。
    ///
    /// # 戻り値
    ///
    /// 行が遷移した場合 `true`。存在しない・削除されていない場合 `false`。
    async fn restore(
        &self,
        tx: &mut TxContext,
        id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<bool, InfraError>;
}

/// users テーブルの行
#[derive(sqlx::FromRow)]
pub(crate) struct UserRow {
    pub id:         Uuid,
    pub email:      String,
    pub name:       String,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRow {
    /// 行をドメインエンティティに変換する
    ///
    /// `deleted_at` / `deleted_by` の片方だけが設定された行は
    /// 不変条件違反（DB の CHECK 制約が防ぐはずのもの）であり、
    /// [`InfraErrorKind::CorruptedRow`](crate::error::InfraErrorKind) になる。
    pub(crate) fn into_user(self) -> Result<User, InfraError> {
        let deletion = match (self.deleted_at, self.deleted_by) {
            (Some(at), Some(by)) => Some(DeletionStamp::new(at, ActorId::new(by))),
            (None, None) => None,
            _ => {
                return Err(InfraError::corrupted_row(format!(
                    "users({}): deleted_at と deleted_by の片方だけが設定されている",
                    self.id
                )));
            }
        };

        Ok(User::from_db(
            UserId::from_uuid(self.id),
            Email::new(&self.email).map_err(|e| InfraError::corrupted_row(e.to_string()))?,
            UserName::new(&self.name).map_err(|e| InfraError::corrupted_row(e.to_string()))?,
            deletion,
            self.created_at,
            self.updated_at,
        ))
    }
}

pub(crate) const USER_COLUMNS: &str =
    "id, email, name, deleted_at, deleted_by, created_at, updated_at";

/// PostgreSQL 実装の UserRepository
#[derive(Debug, Clone)]
pub struct PostgresUserRepository {
    pool: PgPool,
}

impl PostgresUserRepository {
    /// 新しいリポジトリインスタンスを作成する
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn insert(&self, tx: &mut TxContext, user: &User) -> Result<(), InfraError> {
        let (deleted_at, deleted_by) = match user.deletion() {
            Some(stamp) => (Some(stamp.deleted_at()), Some(stamp.deleted_by().as_str())),
            None => (None, None),
        };

        sqlx::query(
            r#"
            INSERT INTO users (id, email, name, deleted_at, deleted_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(user.id().as_uuid())
        .bind(user.email().as_str())
        .bind(user.name().as_str())
        .bind(deleted_at)
        .bind(deleted_by)
        .bind(user.created_at())
        .bind(user.updated_at())
        .execute(tx.conn())
        .await?;

        Ok(())
    }

    async fn find_active_by_id(&self, id: &UserId) -> Result<Option<User>, InfraError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(UserRow::into_user).transpose()
    }

    async fn find_by_id_any(&self, id: &UserId) -> Result<Option<User>, InfraError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(UserRow::into_user).transpose()
    }

    async fn find_all_active(&self) -> Result<Vec<User>, InfraError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE deleted_at IS NULL ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(UserRow::into_user).collect()
    }

    async fn find_all_any(&self) -> Result<Vec<User>, InfraError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(UserRow::into_user).collect()
    }

    async fn soft_delete(
        &self,
        tx: &mut TxContext,
        id: &UserId,
        deleted_by: &ActorId,
        now: DateTime<Utc>,
    ) -> Result<bool, InfraError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET deleted_at = $2, deleted_by = $3, updated_at = $2
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id.as_uuid())
        .bind(now)
        .bind(deleted_by.as_str())
        .execute(tx.conn())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn soft_delete_many(
        &self,
        tx: &mut TxContext,
        filter: &UserFilter,
        deleted_by: &ActorId,
        now: DateTime<Utc>,
    ) -> Result<u64, InfraError> {
        let mut builder = QueryBuilder::<Postgres>::new("UPDATE users SET deleted_at = ");
        builder.push_bind(now);
        builder.push(", deleted_by = ");
        builder.push_bind(deleted_by.as_str().to_string());
        builder.push(", updated_at = ");
        builder.push_bind(now);
        // 削除済み行の再スタンプ防止。フィルタの内容に関わらず必ず付与する。
        builder.push(" WHERE deleted_at IS NULL");

        if let Some(name) = &filter.name_contains {
            builder.push(" AND name LIKE ");
            builder.push_bind(format!("%{name}%"));
        }
        if let Some(before) = filter.created_before {
            builder.push(" AND created_at < ");
            builder.push_bind(before);
        }

        let result = builder.build().execute(tx.conn()).await?;
        Ok(result.rows_affected())
    }

    async fn restore(
        &self,
        tx: &mut TxContext,
        id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<bool, InfraError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET deleted_at = NULL, deleted_by = NULL, updated_at = $2
            WHERE id = $1 AND deleted_at IS NOT NULL
            "#,
        )
        .bind(id.as_uuid())
        .bind(now)
        .execute(tx.conn())
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
