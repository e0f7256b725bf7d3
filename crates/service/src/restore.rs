//! # 復元サービス
//!
//! 論理削除済みレコードをアクティブ状態に戻すユースケース。
//!
//! ## 設計方針
//!
//! - **前提条件**: 対象が存在し、かつ論理削除済みであること。
//!   「存在しない」と「削除されていない」は区別せず
//!   [`ServiceError::NotFoundOrNotDeleted`] に畳む（存在有無の
//!   漏えい防止）
//! - **来歴の連鎖**: 監査ログには復元者に加え、元の削除者と削除日時を
//!   メタデータとして記録する。復元後のレコードからスタンプは消えるが、
//!   監査ログを辿れば誰が消して誰が戻したかを常に再構成できる

use std::sync::Arc;

use kiroku_domain::{
    actor::ActorId,
    audit::AuditLogEntry,
    clock::Clock,
    operation::OperationId,
    user::UserId,
};
use kiroku_infra::{
    OperationContextStore,
    db::TransactionManager,
    repository::{AuditLogRepository, UserRepository},
};

use crate::error::ServiceError;

/// 復元ユースケース
pub struct RestorationService {
    user_repository:  Arc<dyn UserRepository>,
    audit_repository: Arc<dyn AuditLogRepository>,
    tx_manager:       Arc<dyn TransactionManager>,
    context_store:    OperationContextStore,
    clock:            Arc<dyn Clock>,
}

impl RestorationService {
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

    /// レコードを復元する
    ///
    /// 1. 削除済みを含めて対象を取得し、削除スタンプを確認
    /// 2. トランザクション開始
    /// 3. スタンプを 1 回の UPDATE でクリア（削除済みの行のみ）
    /// 4. 元の削除者・削除日時を来歴として `record.restore` を記録
    /// 5. コミット
    ///
    /// 手順 1 と 3 の間で別の操作が先に復元した場合、UPDATE は空振りし
    /// `NotFoundOrNotDeleted` になる（何も書かない）。
    pub async fn restore(
        &self,
        op_id: &OperationId,
        user_id: &UserId,
        restored_by: ActorId,
    ) -> Result<(), ServiceError> {
        let ctx = self.context_store.get(op_id);
        let now = self.clock.now();

        // 元の削除スタンプを来歴として写すため、復元前に取得する
        let user = self
            .user_repository
            .find_by_id_any(user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFoundOrNotDeleted(user_id.to_string()))?;

        let Some(original) = user.deletion().cloned() else {
            return Err(ServiceError::NotFoundOrNotDeleted(user_id.to_string()));
        };

        let mut tx = self.tx_manager.begin().await?;

        let changed = self.user_repository.restore(&mut tx, user_id, now).await?;
        if !changed {
            return Err(ServiceError::NotFoundOrNotDeleted(user_id.to_string()));
        }

        let entry =
            AuditLogEntry::record_restore(user_id, restored_by.clone(), &original, &ctx, now);
        self.audit_repository.record(&mut tx, &entry).await?;

        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            restored_by = %restored_by,
            original_deleted_by = %original.deleted_by(),
            "レコードを復元した"
        );
        Ok(())
    }
}
