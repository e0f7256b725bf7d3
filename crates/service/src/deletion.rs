//! # 論理削除サービス
//!
//! レコードに削除スタンプを設定し、監査ログを記録するユースケース。
//!
//! ## 設計方針
//!
//! - **変更と監査の原子性**: 削除スタンプの UPDATE と監査ログの INSERT
//!   は同一トランザクション。監査ログが書けなければ削除ごと
//!   ロールバックされる
//! - **操作コンテキストの解決**: アクター・IP・User-Agent は
//!   操作 ID をキーに [`OperationContextStore`] から引く。
//!   コンテキスト未設定の削除は `system` 起因として記録される
//! - **呼び出し側互換**: 対象が存在しない・削除済みの場合は
//!   物理削除と同じく [`ServiceError::NotFound`] を返す

use std::sync::Arc;

use kiroku_domain::{
    audit::AuditLogEntry,
    clock::Clock,
    operation::OperationId,
    user::UserId,
};
use kiroku_infra::{
    OperationContextStore,
    db::TransactionManager,
    repository::{AuditLogRepository, UserFilter, UserRepository},
};

use crate::error::ServiceError;

/// 論理削除ユースケース
pub struct DeletionService {
    user_repository:  Arc<dyn UserRepository>,
    audit_repository: Arc<dyn AuditLogRepository>,
    tx_manager:       Arc<dyn TransactionManager>,
    context_store:    OperationContextStore,
    clock:            Arc<dyn Clock>,
}

impl DeletionService {
    pub fn new(
        user_repository: Arc<dyn UserRepository>,
        audit_repository: Arc<dyn AuditLogRepository>,
        tx_manager: Arc<dyn TransactionManager>,
        context_store: OperationContextStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            user_repository,
            audit_repository,
            tx_manager,
            context_store,
            clock,
        }
    }

    /// レコードを論理削除する
    ///
    /// 1. 操作コンテキストを解決
    /// 2. トランザクション開始
    /// 3. 削除スタンプを設定（未削除の行のみ）
    /// 4. 監査ログに `record.delete` を 1 件記録
    /// 5. コミット
    ///
    /// 行が遷移しなかった場合は何も書かずに `NotFound`。
    pub async fn soft_delete(
        &self,
        op_id: &OperationId,
        user_id: &UserId,
    ) -> Result<(), ServiceError> {
        let ctx = self.context_store.get(op_id);
        let now = self.clock.now();

        let mut tx = self.tx_manager.begin().await?;

        let changed = self
            .user_repository
            .soft_delete(&mut tx, user_id, &ctx.effective_actor(), now)
            .await?;

        if !changed {
            // tx はドロップでロールバック（書き込みは発生していない）
            return Err(ServiceError::NotFound(user_id.to_string()));
        }

        let entry = AuditLogEntry::record_delete(user_id, &ctx, now);
        self.audit_repository.record(&mut tx, &entry).await?;

        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            actor = %ctx.effective_actor(),
            "レコードを論理削除した"
        );
        Ok(())
    }

    /// フィルタに一致するレコードを一括論理削除する
    ///
    /// 該当件数に関わらず、一括操作につき `record.delete_many` の
    /// 監査ログを 1 件記録する。メタデータにはフィルタの形と
    /// 該当件数のみが載り、行データは載らない。
    ///
    /// # 戻り値
    ///
    /// 削除スタンプを設定した件数。
    pub async fn soft_delete_many(
        &self,
        op_id: &OperationId,
        filter: &UserFilter,
    ) -> Result<u64, ServiceError> {
        let ctx = self.context_store.get(op_id);
        let now = self.clock.now();

        let mut tx = self.tx_manager.begin().await?;

        let count = self
            .user_repository
            .soft_delete_many(&mut tx, filter, &ctx.effective_actor(), now)
            .await?;

        let entry = AuditLogEntry::record_delete_many(filter.shape(), count, &ctx, now);
        self.audit_repository.record(&mut tx, &entry).await?;

        tx.commit().await?;

        tracing::info!(
            matched_count = count,
            actor = %ctx.effective_actor(),
            "レコードを一括論理削除した"
        );
        Ok(count)
    }
}
