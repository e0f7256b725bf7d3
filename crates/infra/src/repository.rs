//! # リポジトリ実装
//!
//! 削除ライフサイクルの永続化操作を提供する。
//!
//! ## 設計方針
//!
//! - **明示的な操作**: CRUD 動詞の透過的な書き換えではなく、
//!   `soft_delete` / `restore` / `find_active_*` という明示的な操作を公開する
//! - **監査ログの分離**: [`AuditLogRepository`] は論理削除の対象外。
//!   監査書き込みが削除書き換えを再帰的に起動する経路は存在しない
//! - **テスタビリティ**: トレイト経由でモック可能な設計

pub mod audit_log_repository;
pub mod cleanup_repository;
pub mod user_repository;

pub use audit_log_repository::{AuditLogRepository, PostgresAuditLogRepository};
pub use cleanup_repository::{
    CleanupJobGuard,
    CleanupRepository,
    PostgresCleanupRepository,
    RelatedCounts,
};
pub use user_repository::{PostgresUserRepository, UserFilter, UserRepository};
