//! # Kiroku インフラ層
//!
//! 削除ライフサイクルコアの永続化・実行基盤を担当する層。
//!
//! ## 責務
//!
//! - **データベース接続**: PostgreSQL への接続プール管理とトランザクション制御
//! - **リポジトリ実装**: 論理削除対応リポジトリ、追記専用監査ログリポジトリ、
//!   クリーンアップ用リポジトリ
//! - **操作コンテキスト保管**: 進行中操作の監査用メタデータのキー付き保管
//!
//! ## 設計方針
//!
//! 削除系・参照系の透過的な書き換えは行わない。論理削除は
//! [`repository::UserRepository`] の明示的な操作
//! （`soft_delete` / `restore` / `find_active_*`）として公開し、
//! 「この形のクエリで書き換えが効いたか」という類のバグを構造的に排除する。
//!
//! 監査ログは別トレイト [`repository::AuditLogRepository`] であり、
//! 論理削除の書き換え対象には一切ならない。監査書き込みが再び
//! 論理削除経路に入る再帰は起こり得ない。
//!
//! ## 依存関係
//!
//! ```text
//! service → infra → domain
//! ```

pub mod context_store;
pub mod db;
pub mod error;
pub mod repository;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use context_store::OperationContextStore;
pub use error::{InfraError, InfraErrorKind};
