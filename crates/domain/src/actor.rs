//! # アクター ID
//!
//! 「誰が操作したか」を表す識別子。監査ログの `actor_id` と
//! レコードの `deleted_by` に記録される。
//!
//! 利用者 ID のほか、バッチやシステム起因の操作を表す予約値
//! `system` を持つ。操作コンテキストにアクターが載っていない
//! 論理削除は `system` に帰属する。

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// システム起因操作の予約アクター名
const SYSTEM_ACTOR: &str = "system";

/// アクター ID（操作主体の識別子）
///
/// Newtype パターンで素の文字列との混同を防ぐ。
/// 中身は呼び出し側の認証基盤が発行した利用者 ID、または `system`。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct ActorId(String);

impl ActorId {
    /// 利用者 ID からアクター ID を作成する
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// システム起因操作を表すアクター ID
    pub fn system() -> Self {
        Self(SYSTEM_ACTOR.to_string())
    }

    /// システム起因操作かどうか
    pub fn is_system(&self) -> bool {
        self.0 == SYSTEM_ACTOR
    }

    /// 文字列参照を取得する
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 所有権を持つ文字列に変換する
    pub fn into_string(self) -> String {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_systemアクターはis_systemがtrueを返す() {
        assert!(ActorId::system().is_system());
    }

    #[test]
    fn test_利用者アクターはis_systemがfalseを返す() {
        assert!(!ActorId::new("admin-1").is_system());
    }

    #[test]
    fn test_displayは中身の文字列をそのまま出力する() {
        assert_eq!(ActorId::new("admin-1").to_string(), "admin-1");
        assert_eq!(ActorId::system().to_string(), "system");
    }
}
