//! # サービス層エラー
//!
//! 削除ライフサイクル操作の呼び出し側に返すエラー。
//! インフラ層のエラーは `#[from]` で透過的に持ち上げる。

use kiroku_infra::InfraError;
use thiserror::Error;

/// サービス層のエラー
#[derive(Debug, Error)]
pub enum ServiceError {
    /// 入力の検証エラー（保持日数の範囲外など）
    #[error("{0}")]
    Validation(String),

    /// 対象レコードが存在しない、または既に削除済み
    #[error("対象が見つかりません: {0}")]
    NotFound(String),

    /// 対象レコードが存在しないか、削除されていない
    ///
    /// 復元は両者を区別しない。存在有無の漏えいを避けるため、
    /// 単一のバリアントに畳む。
    #[error("対象が見つからないか、削除されていません: {0}")]
    NotFoundOrNotDeleted(String),

    /// 確認プロンプトで実行が拒否された
    #[error("確認プロンプトで実行が拒否されました")]
    ConfirmationDenied,

    /// クリーンアップジョブが既に実行中
    #[error("クリーンアップジョブは既に実行中です")]
    JobAlreadyRunning,

    /// インフラ層のエラー
    #[error(transparent)]
    Infra(#[from] InfraError),
}
