//! # モックリポジトリ
//!
//! サービス層のテストで使用するインメモリ実装。
//!
//! ## 設計方針
//!
//! - **共有ストア**: 3 つのリポジトリが同じ [`MockStore`] を参照する
//!   ことで、「ユーザーを論理削除すると監査ログも増える」といった
//!   クロスリポジトリのシナリオを 1 つのストアで検証できる
//! - **SQL 実装と同じ述語**: 可視性フィルタやカーソル比較は
//!   PostgreSQL 実装の WHERE 句と同じ条件をインメモリで再現する
//! - **故障注入**: `fail_hard_delete` で特定レコードの物理削除を
//!   失敗させ、部分失敗時の継続動作を検証できる

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kiroku_domain::{
    actor::ActorId,
    audit::AuditLogEntry,
    user::{User, UserId},
};

use crate::{
    db::{TransactionManager, TxContext},
    error::InfraError,
    repository::{
        AuditLogRepository, CleanupJobGuard, CleanupRepository, RelatedCounts, UserFilter,
        UserRepository,
    },
};

/// モックリポジトリ群が共有するインメモリストア
#[derive(Debug, Clone, Default)]
pub struct MockStore {
    users:                Arc<Mutex<Vec<User>>>,
    audit_entries:        Arc<Mutex<Vec<AuditLogEntry>>>,
    related:              Arc<Mutex<HashMap<UserId, RelatedCounts>>>,
    failing_hard_deletes: Arc<Mutex<HashSet<UserId>>>,
    cleanup_lock:         Arc<AtomicBool>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// ユーザーを直接投入する
    pub fn seed_user(&self, user: User) {
        self.users.lock().unwrap().push(user);
    }

    /// レコードの関連データ件数を設定する
    pub fn set_related(&self, id: UserId, counts: RelatedCounts) {
        self.related.lock().unwrap().insert(id, counts);
    }

    /// 指定レコードの物理削除を失敗させる
    pub fn fail_hard_delete(&self, id: UserId) {
        self.failing_hard_deletes.lock().unwrap().insert(id);
    }

    /// 現在のユーザー一覧のスナップショット
    pub fn users(&self) -> Vec<User> {
        self.users.lock().unwrap().clone()
    }

    /// ID でユーザーを取得する（削除済みを含む）
    pub fn user(&self, id: &UserId) -> Option<User> {
        self.users.lock().unwrap().iter().find(|u| u.id() == id).cloned()
    }

    /// 記録された監査ログのスナップショット
    pub fn audit_entries(&self) -> Vec<AuditLogEntry> {
        self.audit_entries.lock().unwrap().clone()
    }

    /// クリーンアップロックを外部から押さえる（実行中ジョブの再現）
    pub fn hold_cleanup_lock(&self) {
        self.cleanup_lock.store(true, Ordering::SeqCst);
    }

    /// クリーンアップロックが保持されているか
    pub fn cleanup_lock_held(&self) -> bool {
        self.cleanup_lock.load(Ordering::SeqCst)
    }
}

// ===== UserRepository =====

/// インメモリ実装の UserRepository
#[derive(Debug, Clone)]
pub struct MockUserRepository {
    store: MockStore,
}

impl MockUserRepository {
    pub fn new(store: MockStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl UserRepository for MockUserRepository {
    async fn insert(&self, _tx: &mut TxContext, user: &User) -> Result<(), InfraError> {
        self.store.users.lock().unwrap().push(user.clone());
        Ok(())
    }

    async fn find_active_by_id(&self, id: &UserId) -> Result<Option<User>, InfraError> {
        Ok(self
            .store
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.id() == id && !u.is_deleted())
            .cloned())
    }

    async fn find_by_id_any(&self, id: &UserId) -> Result<Option<User>, InfraError> {
        Ok(self.store.user(id))
    }

    async fn find_all_active(&self) -> Result<Vec<User>, InfraError> {
        Ok(self
            .store
            .users
            .lock()
            .unwrap()
            .iter()
            .filter(|u| !u.is_deleted())
            .cloned()
            .collect())
    }

    async fn find_all_any(&self) -> Result<Vec<User>, InfraError> {
        Ok(self.store.users())
    }

    async fn soft_delete(
        &self,
        _tx: &mut TxContext,
        id: &UserId,
        deleted_by: &ActorId,
        now: DateTime<Utc>,
    ) -> Result<bool, InfraError> {
        let mut users = self.store.users.lock().unwrap();
        match users.iter_mut().find(|u| u.id() == id && !u.is_deleted()) {
            Some(user) => {
                *user = user.clone().soft_deleted(deleted_by.clone(), now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn soft_delete_many(
        &self,
        _tx: &mut TxContext,
        filter: &UserFilter,
        deleted_by: &ActorId,
        now: DateTime<Utc>,
    ) -> Result<u64, InfraError> {
        let mut users = self.store.users.lock().unwrap();
        let mut count = 0;
        for user in users.iter_mut() {
            if !user.is_deleted() && filter.matches(user) {
                *user = user.clone().soft_deleted(deleted_by.clone(), now);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn restore(
        &self,
        _tx: &mut TxContext,
        id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<bool, InfraError> {
        let mut users = self.store.users.lock().unwrap();
        match users.iter_mut().find(|u| u.id() == id && u.is_deleted()) {
            Some(user) => {
                // is_deleted で絞っているため restored は失敗しない
                *user = user.clone().restored(now).map_err(|e| {
                    InfraError::unexpected(format!("モックの復元に失敗: {e}"))
                })?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ===== AuditLogRepository =====

/// インメモリ実装の AuditLogRepository
#[derive(Debug, Clone)]
pub struct MockAuditLogRepository {
    store: MockStore,
}

impl MockAuditLogRepository {
    pub fn new(store: MockStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AuditLogRepository for MockAuditLogRepository {
    async fn record(&self, _tx: &mut TxContext, entry: &AuditLogEntry) -> Result<(), InfraError> {
        self.store.audit_entries.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn find_by_target(
        &self,
        target_id: &str,
        target_type: &str,
    ) -> Result<Vec<AuditLogEntry>, InfraError> {
        let mut entries: Vec<AuditLogEntry> = self
            .store
            .audit_entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.target_id == target_id && e.target_type == target_type)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }
}

// ===== CleanupRepository =====

/// インメモリ実装の CleanupRepository
#[derive(Debug, Clone)]
pub struct MockCleanupRepository {
    store: MockStore,
}

impl MockCleanupRepository {
    pub fn new(store: MockStore) -> Self {
        Self { store }
    }

    fn eligible(&self, cutoff: DateTime<Utc>) -> Vec<User> {
        let mut eligible: Vec<User> = self
            .store
            .users
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.deletion().is_some_and(|s| s.deleted_at() <= cutoff))
            .cloned()
            .collect();
        eligible.sort_by_key(|u| (u.deletion().map(|s| s.deleted_at()), *u.id()));
        eligible
    }
}

#[async_trait]
impl CleanupRepository for MockCleanupRepository {
    async fn count_eligible(&self, cutoff: DateTime<Utc>) -> Result<u64, InfraError> {
        Ok(self.eligible(cutoff).len() as u64)
    }

    async fn find_eligible_page(
        &self,
        cutoff: DateTime<Utc>,
        cursor: Option<(DateTime<Utc>, UserId)>,
        limit: i64,
    ) -> Result<Vec<User>, InfraError> {
        let page = self
            .eligible(cutoff)
            .into_iter()
            .filter(|u| match (cursor, u.deletion()) {
                (Some((after_at, after_id)), Some(stamp)) => {
                    (stamp.deleted_at(), *u.id()) > (after_at, after_id)
                }
                (None, _) => true,
                (_, None) => false,
            })
            .take(limit.max(0) as usize)
            .collect();
        Ok(page)
    }

    async fn related_counts(&self, id: &UserId) -> Result<RelatedCounts, InfraError> {
        Ok(self
            .store
            .related
            .lock()
            .unwrap()
            .get(id)
            .copied()
            .unwrap_or_default())
    }

    async fn hard_delete(&self, tx: &mut TxContext, id: &UserId) -> Result<bool, InfraError> {
        let _ = tx;
        if self.store.failing_hard_deletes.lock().unwrap().contains(id) {
            return Err(InfraError::unexpected(format!(
                "物理削除の故障注入: {id}"
            )));
        }

        let mut users = self.store.users.lock().unwrap();
        let before = users.len();
        users.retain(|u| !(u.id() == id && u.is_deleted()));
        Ok(users.len() < before)
    }

    async fn try_acquire_job_lock(
        &self,
    ) -> Result<Option<Box<dyn CleanupJobGuard>>, InfraError> {
        let acquired = self
            .store
            .cleanup_lock
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();

        if !acquired {
            return Ok(None);
        }

        Ok(Some(Box::new(MockCleanupJobGuard {
            lock: Arc::clone(&self.store.cleanup_lock),
        })))
    }
}

struct MockCleanupJobGuard {
    lock: Arc<AtomicBool>,
}

#[async_trait]
impl CleanupJobGuard for MockCleanupJobGuard {
    async fn release(self: Box<Self>) -> Result<(), InfraError> {
        self.lock.store(false, Ordering::SeqCst);
        Ok(())
    }
}

// ===== TransactionManager =====

/// モック TxContext を返す TransactionManager
#[derive(Debug, Clone, Default)]
pub struct MockTransactionManager;

impl MockTransactionManager {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransactionManager for MockTransactionManager {
    async fn begin(&self) -> Result<TxContext, InfraError> {
        Ok(TxContext::mock())
    }
}
