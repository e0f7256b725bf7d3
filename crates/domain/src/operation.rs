//! # 操作コンテキスト
//!
//! 1 回の操作（典型的には 1 リクエスト）に紐づく監査用メタデータ。
//! 呼び出し側の認証・HTTP 層が操作開始時に設定し、操作終了時に
//! 明示的にクリアする。永続化はされない。
//!
//! コンテキストは操作 ID をキーとして引くため、スレッドやタスクの
//! ローカル状態には依存しない。クリア漏れはメモリ増加の原因には
//! なるが、別操作への誤帰属は起こさない。

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::actor::ActorId;

/// 操作 ID（進行中の 1 操作を識別するキー）
///
/// 中身は呼び出し側が発行するリクエスト ID など任意の一意文字列。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct OperationId(String);

impl OperationId {
    /// 操作 ID を作成する
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// 文字列参照を取得する
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 操作コンテキスト
///
/// すべてのフィールドは任意。未設定の操作（バッチ起動など）は
/// [`Default`] の空コンテキストとして扱われ、アクターは
/// `system` に帰属する。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationContext {
    /// 操作主体のアクター ID
    pub actor_id:   Option<ActorId>,
    /// 接続元 IP アドレス
    pub ip_address: Option<String>,
    /// User-Agent ヘッダ値
    pub user_agent: Option<String>,
}

impl OperationContext {
    /// アクター ID 付きのコンテキストを作成する
    pub fn for_actor(actor_id: ActorId) -> Self {
        Self {
            actor_id:   Some(actor_id),
            ip_address: None,
            user_agent: None,
        }
    }

    /// 実効アクターを返す
    ///
    /// コンテキストにアクターが載っていなければ `system` に帰属する。
    pub fn effective_actor(&self) -> ActorId {
        self.actor_id.clone().unwrap_or_else(ActorId::system)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_空コンテキストの実効アクターはsystemになる() {
        let ctx = OperationContext::default();
        assert_eq!(ctx.effective_actor(), ActorId::system());
    }

    #[test]
    fn test_アクター付きコンテキストの実効アクターは本人になる() {
        let ctx = OperationContext::for_actor(ActorId::new("admin-1"));
        assert_eq!(ctx.effective_actor(), ActorId::new("admin-1"));
    }
}
