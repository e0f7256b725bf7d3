//! # 保持期間クリーンアップサービス
//!
//! 保持期間を過ぎた論理削除済みレコードを物理削除するジョブ。
//!
//! ## 設計方針
//!
//! - **dry-run はゼロ書き込み**: dry-run 経路からは書き込み系の
//!   リポジトリメソッドに到達するコードパスが存在しない。
//!   監査ログも書かず、ジョブロックも取らない
//! - **確認はロックの前**: 確認プロンプトで待つ間、他のジョブ実行を
//!   妨げない
//! - **部分失敗への耐性**: 1 レコードの失敗はログと結果集計に残し、
//!   ページもジョブも中断しない。全体失敗（件数クエリ・ロック取得）は
//!   即座に中断して伝播する
//! - **協調キャンセル**: [`CancellationToken`] はページ境界でのみ
//!   確認する。開始済みのページは最後まで処理される
//! - **削除が先、監査が後**: レコードごとに物理 DELETE と
//!   `record.hard_delete` の監査 INSERT を同一トランザクションで
//!   コミットする。監査が書けなければパージごとロールバックし、
//!   そのレコードは失敗として数える

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kiroku_domain::{
    actor::ActorId,
    audit::AuditLogEntry,
    clock::Clock,
    retention::RetentionPeriod,
    user::{User, UserId},
};
use kiroku_infra::{
    db::TransactionManager,
    repository::{AuditLogRepository, CleanupRepository},
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::ServiceError;

/// 1 ページあたりの処理件数
pub const CLEANUP_PAGE_SIZE: i64 = 100;

/// クリーンアップジョブの起動オプション
#[derive(Debug, Clone)]
pub struct CleanupOptions {
    /// 保持日数（1〜3650）
    pub retention_days: i64,
    /// 対象の列挙だけを行い、何も書き込まない
    pub dry_run:        bool,
    /// 確認プロンプトを省略して実行する
    pub force:          bool,
    /// レポートにメールアドレスの生値を含める
    pub verbose:        bool,
}

/// 実行前の確認プロンプト
///
/// CLI やスケジューラなどの呼び出し側が実装する。
/// `force` が指定されない実行では、パージ前にここで承認を得る。
#[async_trait]
pub trait ConfirmationPrompt: Send + Sync {
    /// `total_found` 件のパージを承認するか問い合わせる
    async fn confirm(&self, total_found: u64) -> bool;
}

/// パージ対象レコード 1 件のレポート
#[derive(Debug, Clone, Serialize)]
pub struct RecordSummary {
    pub id:         UserId,
    /// verbose 実行でなければマスク済みの値
    pub email:      String,
    pub deleted_at: DateTime<Utc>,
    pub deleted_by: ActorId,
    pub documents:  u64,
    pub comments:   u64,
}

/// クリーンアップジョブの実行結果
#[derive(Debug, Clone, Serialize)]
pub struct CleanupResult {
    pub total_found:   u64,
    pub success_count: u64,
    pub failed_count:  u64,
    pub cutoff:        DateTime<Utc>,
    pub was_dry_run:   bool,
    pub failed_ids:    Vec<UserId>,
    pub summaries:     Vec<RecordSummary>,
}

impl CleanupResult {
    fn empty(cutoff: DateTime<Utc>, was_dry_run: bool) -> Self {
        Self {
            total_found: 0,
            success_count: 0,
            failed_count: 0,
            cutoff,
            was_dry_run,
            failed_ids: Vec::new(),
            summaries: Vec::new(),
        }
    }
}

/// 保持期間クリーンアップのユースケース
pub struct RetentionCleanupService {
    cleanup_repository: Arc<dyn CleanupRepository>,
    audit_repository:   Arc<dyn AuditLogRepository>,
    tx_manager:         Arc<dyn TransactionManager>,
    clock:              Arc<dyn Clock>,
    prompt:             Option<Arc<dyn ConfirmationPrompt>>,
}

impl RetentionCleanupService {
    pub fn new(
        cleanup_repository: Arc<dyn CleanupRepository>,
        audit_repository: Arc<dyn AuditLogRepository>,
        tx_manager: Arc<dyn TransactionManager>,
        clock: Arc<dyn Clock>,
        prompt: Option<Arc<dyn ConfirmationPrompt>>,
    ) -> Self {
        Self {
            cleanup_repository,
            audit_repository,
            tx_manager,
            clock,
            prompt,
        }
    }

    /// クリーンアップジョブを実行する
    ///
    /// 1. 保持日数を検証し、カットオフ日時を算出
    /// 2. 対象件数を数える。ゼロなら即座に空の結果を返す
    /// 3. 実行モードでは確認を得る（`force` または承認）
    /// 4. 実行モードではジョブロックを取得（実行中なら
    ///    `JobAlreadyRunning`）。dry-run はロックを取らない
    /// 5. `(deleted_at, id)` 順にページ単位で処理し、ページ境界で
    ///    キャンセルを確認する
    pub async fn run(
        &self,
        options: &CleanupOptions,
        cancel: &CancellationToken,
    ) -> Result<CleanupResult, ServiceError> {
        let retention = RetentionPeriod::days(options.retention_days)
            .map_err(|e| ServiceError::Validation(e.to_string()))?;
        let now = self.clock.now();
        let cutoff = retention.cutoff_from(now);

        let total_found = self.cleanup_repository.count_eligible(cutoff).await?;
        if total_found == 0 {
            info!(cutoff = %cutoff, "パージ対象なし");
            return Ok(CleanupResult::empty(cutoff, options.dry_run));
        }

        if !options.dry_run && !options.force {
            let Some(prompt) = &self.prompt else {
                return Err(ServiceError::Validation(
                    "確認プロンプトがない実行には force の指定が必要です".to_string(),
                ));
            };
            if !prompt.confirm(total_found).await {
                return Err(ServiceError::ConfirmationDenied);
            }
        }

        // dry-run はゼロ書き込みのためロック不要
        let guard = if options.dry_run {
            None
        } else {
            Some(
                self.cleanup_repository
                    .try_acquire_job_lock()
                    .await?
                    .ok_or(ServiceError::JobAlreadyRunning)?,
            )
        };

        info!(
            cutoff = %cutoff,
            total_found,
            dry_run = options.dry_run,
            retention_days = retention.as_days(),
            "クリーンアップジョブを開始"
        );

        let result = self
            .run_pages(options, retention, cutoff, total_found, cancel)
            .await;

        if let Some(guard) = guard {
            if let Err(e) = guard.release().await {
                error!(error = %e, "ジョブロックの解放に失敗");
            }
        }

        if let Ok(result) = &result {
            info!(
                success_count = result.success_count,
                failed_count = result.failed_count,
                "クリーンアップジョブを終了"
            );
        }
        result
    }

    async fn run_pages(
        &self,
        options: &CleanupOptions,
        retention: RetentionPeriod,
        cutoff: DateTime<Utc>,
        total_found: u64,
        cancel: &CancellationToken,
    ) -> Result<CleanupResult, ServiceError> {
        let mut result = CleanupResult {
            total_found,
            ..CleanupResult::empty(cutoff, options.dry_run)
        };
        let mut cursor: Option<(DateTime<Utc>, UserId)> = None;

        loop {
            if cancel.is_cancelled() {
                info!("キャンセル要求によりクリーンアップを停止");
                break;
            }

            let page = self
                .cleanup_repository
                .find_eligible_page(cutoff, cursor, CLEANUP_PAGE_SIZE)
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = last
                .deletion()
                .map(|stamp| (stamp.deleted_at(), *last.id()));

            for user in &page {
                self.process_record(options, retention, user, &mut result)
                    .await;
            }

            if (page.len() as i64) < CLEANUP_PAGE_SIZE {
                break;
            }
        }

        Ok(result)
    }

    /// 対象レコード 1 件を処理する
    ///
    /// 失敗はログと結果集計に残すだけで、呼び出し元には伝播しない。
    async fn process_record(
        &self,
        options: &CleanupOptions,
        retention: RetentionPeriod,
        user: &User,
        result: &mut CleanupResult,
    ) {
        let Some(stamp) = user.deletion() else {
            // find_eligible_page の述語上ここには来ない
            warn!(user_id = %user.id(), "削除スタンプのない対象をスキップ");
            result.failed_count += 1;
            result.failed_ids.push(*user.id());
            return;
        };

        match self.purge_one(options, retention, user).await {
            Ok(summary) => {
                if !options.dry_run {
                    info!(
                        user_id = %user.id(),
                        documents = summary.documents,
                        comments = summary.comments,
                        "レコードを物理削除した"
                    );
                }
                result.success_count += 1;
                result.summaries.push(summary);
            }
            Err(e) => {
                error!(
                    user_id = %user.id(),
                    deleted_at = %stamp.deleted_at(),
                    error = %e,
                    "レコードの処理に失敗（ジョブは継続）"
                );
                result.failed_count += 1;
                result.failed_ids.push(*user.id());
            }
        }
    }

    async fn purge_one(
        &self,
        options: &CleanupOptions,
        retention: RetentionPeriod,
        user: &User,
    ) -> Result<RecordSummary, ServiceError> {
        let stamp = user
            .deletion()
            .ok_or_else(|| ServiceError::NotFoundOrNotDeleted(user.id().to_string()))?;

        let related = self.cleanup_repository.related_counts(user.id()).await?;
        let summary = RecordSummary {
            id:         *user.id(),
            email:      if options.verbose {
                user.email().as_str().to_string()
            } else {
                user.email().masked()
            },
            deleted_at: stamp.deleted_at(),
            deleted_by: stamp.deleted_by().clone(),
            documents:  related.documents,
            comments:   related.comments,
        };

        if options.dry_run {
            return Ok(summary);
        }

        let mut tx = self.tx_manager.begin().await?;

        let deleted = self.cleanup_repository.hard_delete(&mut tx, user.id()).await?;
        if !deleted {
            // ページ取得後に復元された、または先行ジョブが消した
            return Err(ServiceError::NotFoundOrNotDeleted(user.id().to_string()));
        }

        let entry =
            AuditLogEntry::record_hard_delete(user.id(), stamp, retention.as_days(), self.clock.now());
        self.audit_repository.record(&mut tx, &entry).await?;

        tx.commit().await?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use chrono::Duration;
    use kiroku_domain::{
        audit::{AuditAction, AuditMetadata},
        clock::FixedClock,
        user::{Email, UserName},
    };
    use kiroku_infra::{
        db::TxContext,
        mock::{
            MockAuditLogRepository, MockCleanupRepository, MockStore, MockTransactionManager,
            MockUserRepository,
        },
        repository::{RelatedCounts, UserRepository},
    };
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn test_now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn service(store: &MockStore, prompt: Option<Arc<dyn ConfirmationPrompt>>) -> RetentionCleanupService {
        RetentionCleanupService::new(
            Arc::new(MockCleanupRepository::new(store.clone())),
            Arc::new(MockAuditLogRepository::new(store.clone())),
            Arc::new(MockTransactionManager::new()),
            Arc::new(FixedClock::new(test_now())),
            prompt,
        )
    }

    /// `days_ago` 日前に論理削除されたユーザーを投入する
    async fn seeded_deleted_user(store: &MockStore, name: &str, days_ago: i64) -> User {
        let user = User::new(
            UserId::new(),
            Email::new(format!("{name}@example.com")).unwrap(),
            UserName::new(name).unwrap(),
            test_now() - Duration::days(days_ago + 1),
        );
        store.seed_user(user.clone());

        let repo = MockUserRepository::new(store.clone());
        let mut tx = TxContext::mock();
        repo.soft_delete(
            &mut tx,
            user.id(),
            &ActorId::new("admin-1"),
            test_now() - Duration::days(days_ago),
        )
        .await
        .unwrap();
        user
    }

    fn options(dry_run: bool) -> CleanupOptions {
        CleanupOptions {
            retention_days: 90,
            dry_run,
            force: true,
            verbose: false,
        }
    }

    /// 常に同じ回答を返す確認プロンプト
    struct FixedPrompt {
        answer: bool,
        asked:  AtomicU64,
    }

    impl FixedPrompt {
        fn new(answer: bool) -> Arc<Self> {
            Arc::new(Self {
                answer,
                asked: AtomicU64::new(0),
            })
        }
    }

    #[async_trait]
    impl ConfirmationPrompt for FixedPrompt {
        async fn confirm(&self, _total_found: u64) -> bool {
            self.asked.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
    }

    #[tokio::test]
    async fn test_保持期間90日で期限切れ2件だけが対象になる() {
        let store = MockStore::new();
        let service = service(&store, None);
        seeded_deleted_user(&store, "user100", 100).await;
        seeded_deleted_user(&store, "user95", 95).await;
        seeded_deleted_user(&store, "user10", 10).await;

        let result = service
            .run(&options(false), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.total_found, 2);
        assert_eq!(result.success_count, 2);
        assert_eq!(result.failed_count, 0);
        assert!(!result.was_dry_run);
        // 10 日前に削除されたレコードは残っている
        assert_eq!(store.users().len(), 1);
    }

    #[tokio::test]
    async fn test_カットオフちょうどのレコードも対象に含まれる() {
        let store = MockStore::new();
        let service = service(&store, None);
        seeded_deleted_user(&store, "boundary", 90).await;

        let result = service
            .run(&options(false), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.total_found, 1);
        assert_eq!(result.success_count, 1);
    }

    #[tokio::test]
    async fn test_dry_runは何も書き込まない() {
        let store = MockStore::new();
        let service = service(&store, None);
        seeded_deleted_user(&store, "user100", 100).await;
        seeded_deleted_user(&store, "user95", 95).await;

        let result = service
            .run(&options(true), &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.was_dry_run);
        assert_eq!(result.total_found, 2);
        assert_eq!(result.summaries.len(), 2);
        // レコードも監査ログも変化しない
        assert_eq!(store.users().len(), 2);
        assert!(store.audit_entries().is_empty());
        // ロックも取らない
        assert!(!store.cleanup_lock_held());
    }

    #[tokio::test]
    async fn test_物理削除はhard_deleteの監査ログを残す() {
        let store = MockStore::new();
        let service = service(&store, None);
        let user = seeded_deleted_user(&store, "user100", 100).await;
        let deleted_at = test_now() - Duration::days(100);

        service
            .run(&options(false), &CancellationToken::new())
            .await
            .unwrap();

        let entries = store.audit_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::HardDelete);
        assert_eq!(entries[0].target_id, user.id().to_string());
        assert_eq!(entries[0].actor_id, Some(ActorId::system()));
        assert_eq!(
            entries[0].metadata,
            AuditMetadata::HardDelete {
                original_deleted_at: deleted_at,
                original_deleted_by: ActorId::new("admin-1"),
                retention_days:      90,
            }
        );
    }

    #[rstest]
    #[case(false, "u***@example.com")]
    #[case(true, "user100@example.com")]
    #[tokio::test]
    async fn test_レポートのメールアドレスはverbose指定時のみ生値になる(
        #[case] verbose: bool,
        #[case] expected: &str,
    ) {
        let store = MockStore::new();
        let service = service(&store, None);
        seeded_deleted_user(&store, "user100", 100).await;

        let opts = CleanupOptions {
            verbose,
            ..options(true)
        };
        let result = service.run(&opts, &CancellationToken::new()).await.unwrap();

        assert_eq!(result.summaries[0].email, expected);
    }

    #[tokio::test]
    async fn test_1件の失敗はジョブを止めず結果に集計される() {
        let store = MockStore::new();
        let service = service(&store, None);
        seeded_deleted_user(&store, "user-a", 100).await;
        let failing = seeded_deleted_user(&store, "user-b", 99).await;
        seeded_deleted_user(&store, "user-c", 98).await;
        store.fail_hard_delete(*failing.id());

        let result = service
            .run(&options(false), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.total_found, 3);
        assert_eq!(result.success_count, 2);
        assert_eq!(result.failed_count, 1);
        assert_eq!(result.failed_ids, vec![*failing.id()]);
        // 失敗したレコードは残り、他はパージ済み
        assert!(store.user(failing.id()).is_some());
        assert_eq!(store.users().len(), 1);
    }

    #[tokio::test]
    async fn test_対象ゼロ件なら確認もロックもなしで空の結果を返す() {
        let store = MockStore::new();
        let prompt = FixedPrompt::new(true);
        let service = service(&store, Some(prompt.clone()));
        seeded_deleted_user(&store, "recent", 10).await;

        let opts = CleanupOptions {
            force: false,
            ..options(false)
        };
        let result = service.run(&opts, &CancellationToken::new()).await.unwrap();

        assert_eq!(result.total_found, 0);
        assert_eq!(prompt.asked.load(Ordering::SeqCst), 0);
        assert!(!store.cleanup_lock_held());
    }

    #[tokio::test]
    async fn test_確認拒否で実行は中止される() {
        let store = MockStore::new();
        let service = service(&store, Some(FixedPrompt::new(false)));
        seeded_deleted_user(&store, "user100", 100).await;

        let opts = CleanupOptions {
            force: false,
            ..options(false)
        };
        let result = service.run(&opts, &CancellationToken::new()).await;

        assert!(matches!(result, Err(ServiceError::ConfirmationDenied)));
        assert_eq!(store.users().len(), 1);
        assert!(!store.cleanup_lock_held());
    }

    #[tokio::test]
    async fn test_承認されれば実行される() {
        let store = MockStore::new();
        let prompt = FixedPrompt::new(true);
        let service = service(&store, Some(prompt.clone()));
        seeded_deleted_user(&store, "user100", 100).await;

        let opts = CleanupOptions {
            force: false,
            ..options(false)
        };
        let result = service.run(&opts, &CancellationToken::new()).await.unwrap();

        assert_eq!(result.success_count, 1);
        assert_eq!(prompt.asked.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_プロンプトなしかつforceなしの実行は検証エラーになる() {
        let store = MockStore::new();
        let service = service(&store, None);
        seeded_deleted_user(&store, "user100", 100).await;

        let opts = CleanupOptions {
            force: false,
            ..options(false)
        };
        let result = service.run(&opts, &CancellationToken::new()).await;

        assert!(matches!(result, Err(ServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn test_forceは確認プロンプトを省略する() {
        let store = MockStore::new();
        let prompt = FixedPrompt::new(false);
        let service = service(&store, Some(prompt.clone()));
        seeded_deleted_user(&store, "user100", 100).await;

        let result = service
            .run(&options(false), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.success_count, 1);
        assert_eq!(prompt.asked.load(Ordering::SeqCst), 0);
    }

    #[rstest]
    #[case(0)]
    #[case(3651)]
    #[tokio::test]
    async fn test_範囲外の保持日数はストアに触れる前に拒否される(#[case] days: i64) {
        let store = MockStore::new();
        let service = service(&store, None);
        seeded_deleted_user(&store, "user100", 100).await;

        let opts = CleanupOptions {
            retention_days: days,
            ..options(false)
        };
        let result = service.run(&opts, &CancellationToken::new()).await;

        assert!(matches!(result, Err(ServiceError::Validation(_))));
        assert_eq!(store.users().len(), 1);
    }

    #[tokio::test]
    async fn test_ロックが取れない場合はjob_already_running() {
        let store = MockStore::new();
        let service = service(&store, None);
        seeded_deleted_user(&store, "user100", 100).await;
        store.hold_cleanup_lock();

        let result = service
            .run(&options(false), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(ServiceError::JobAlreadyRunning)));
        assert_eq!(store.users().len(), 1);
    }

    #[tokio::test]
    async fn test_ジョブ終了後にロックは解放される() {
        let store = MockStore::new();
        let service = service(&store, None);
        seeded_deleted_user(&store, "user100", 100).await;

        service
            .run(&options(false), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!store.cleanup_lock_held());
    }

    #[tokio::test]
    async fn test_キャンセル済みトークンでは1ページも処理されない() {
        let store = MockStore::new();
        let service = service(&store, None);
        seeded_deleted_user(&store, "user100", 100).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = service.run(&options(false), &cancel).await.unwrap();

        assert_eq!(result.total_found, 1);
        assert_eq!(result.success_count, 0);
        assert_eq!(store.users().len(), 1);
        // ロックは取得済みでも解放される
        assert!(!store.cleanup_lock_held());
    }

    #[tokio::test]
    async fn test_関連データの件数がレポートに載る() {
        let store = MockStore::new();
        let service = service(&store, None);
        let user = seeded_deleted_user(&store, "user100", 100).await;
        store.set_related(
            *user.id(),
            RelatedCounts {
                documents: 3,
                comments:  7,
            },
        );

        let result = service
            .run(&options(true), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.summaries[0].documents, 3);
        assert_eq!(result.summaries[0].comments, 7);
    }

    #[tokio::test]
    async fn test_ページサイズを超える対象も全件処理される() {
        let store = MockStore::new();
        let service = service(&store, None);
        for i in 0..(CLEANUP_PAGE_SIZE as usize + 5) {
            seeded_deleted_user(&store, &format!("user{i}"), 100).await;
        }

        let result = service
            .run(&options(false), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.success_count, CLEANUP_PAGE_SIZE as u64 + 5);
        assert!(store.users().is_empty());
    }
}
