//! # Kiroku サービス層
//!
//! 削除ライフサイクルのユースケースを提供する層。
//!
//! ## 責務
//!
//! - **論理削除**: [`deletion::DeletionService`] — 削除スタンプの設定と
//!   監査ログ記録を 1 トランザクションで行う
//! - **復元**: [`restore::RestorationService`] — スタンプのクリアと
//!   来歴付き監査ログ記録
//! - **保持期間クリーンアップ**: [`cleanup::RetentionCleanupService`] —
//!   保持期間を過ぎたレコードの物理削除ジョブ
//!
//! ## 設計方針
//!
//! すべての状態変更は「変更 + 監査ログ」を同一トランザクションで
//! コミットする。監査ログが書けない変更は変更ごと失敗する。

pub mod cleanup;
pub mod deletion;
pub mod error;
pub mod restore;

pub use cleanup::{
    CLEANUP_PAGE_SIZE,
    CleanupOptions,
    CleanupResult,
    ConfirmationPrompt,
    RecordSummary,
    RetentionCleanupService,
};
pub use deletion::DeletionService;
pub use error::ServiceError;
pub use restore::RestorationService;
