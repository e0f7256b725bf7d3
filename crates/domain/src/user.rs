//! # ユーザー（削除可能レコード）
//!
//! 論理削除の対象となるレコードのエンティティと値オブジェクトを定義する。
//!
//! ## 不変条件
//!
//! `deleted_at` と `deleted_by` は「両方 NULL」か「両方設定済み」の
//! いずれかでなければならない。このペア制約は 2 本の `Option`
//! ではなく [`DeletionStamp`] を 1 本の `Option` で持つことで、
//! 片方だけ設定された状態を型レベルで表現不能にしている。
//!
//! ## 設計方針
//!
//! - **Newtype パターン**: [`UserId`] は UUID をラップし、型安全性を確保
//! - **不変性**: フィールドは基本的に不変、状態遷移は `soft_deleted` /
//!   `restored` が新しいインスタンスを返す
//! - **バリデーション**: 値オブジェクトの生成時に検証ロジックを実行
//!
//! ## 使用例
//!
//! ```rust
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use kiroku_domain::{
//!     actor::ActorId,
//!     user::{Email, User, UserId, UserName},
//! };
//!
//! let now = chrono::Utc::now();
//! let user = User::new(
//!     UserId::new(),
//!     Email::new("user@example.com")?,
//!     UserName::new("山田太郎")?,
//!     now,
//! );
//! assert!(!user.is_deleted());
//!
//! let deleted = user.soft_deleted(ActorId::new("admin-1"), now);
//! assert!(deleted.is_deleted());
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{DomainError, actor::ActorId};

/// ユーザー ID（一意識別子）
///
/// UUID v7 を使用し、生成順にソート可能。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct UserId(Uuid);

impl UserId {
    /// 新しいユーザー ID を生成する
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// 既存の UUID からユーザー ID を作成する
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// 内部の UUID 参照を取得する
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

/// メールアドレス（値オブジェクト）
///
/// 生成時にバリデーションを実行し、不正な値の作成を防ぐ。
/// クリーンアップ結果などの報告出力には [`masked`](Email::masked) を
/// 使用し、verbose モードが明示されない限り生値を露出しない。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email(String);

impl Email {
    /// メールアドレスを作成する
    ///
    /// # バリデーション
    ///
    /// - 空文字列ではない
    /// - `local@domain` の形式である
    /// - 最大 255 文字
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();

        if value.is_empty() {
            return Err(DomainError::Validation(
                "メールアドレスは必須です".to_string(),
            ));
        }

        let Some((local, domain)) = value.split_once('@') else {
            return Err(DomainError::Validation(
                "メールアドレスの形式が不正です".to_string(),
            ));
        };

        if local.is_empty() || domain.is_empty() {
            return Err(DomainError::Validation(
                "メールアドレスの形式が不正です".to_string(),
            ));
        }

        if value.len() > 255 {
            return Err(DomainError::Validation(
                "メールアドレスは255文字以内である必要があります".to_string(),
            ));
        }

        Ok(Self(value))
    }

    /// 文字列参照を取得する
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 所有権を持つ文字列に変換する
    pub fn into_string(self) -> String {
        self.0
    }

    /// PII をマスクした表示用文字列を返す
    ///
    /// ローカル部の先頭 1 文字だけを残し、残りを `***` に置換する。
    /// ドメイン部はそのまま残す（例: `yamada@example.com` →
    /// `y***@example.com`）。生成時バリデーションにより `@` の存在は
    /// 保証されている。
    pub fn masked(&self) -> String {
        match self.0.split_once('@') {
            Some((local, domain)) => {
                let head: String = local.chars().take(1).collect();
                format!("{head}***@{domain}")
            }
            None => "***".to_string(),
        }
    }
}

impl std::fmt::Display for Email {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ユーザー表示名（値オブジェクト）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct UserName(String);

impl UserName {
    /// ユーザー名を作成する
    ///
    /// # バリデーション
    ///
    /// - 空文字列ではない
    /// - 最大 100 文字
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();

        if value.is_empty() {
            return Err(DomainError::Validation("名前は必須です".to_string()));
        }

        if value.chars().count() > 100 {
            return Err(DomainError::Validation(
                "名前は100文字以内である必要があります".to_string(),
            ));
        }

        Ok(Self(value))
    }

    /// 文字列参照を取得する
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 論理削除スタンプ
///
/// 「いつ・誰が」削除したかのペア。`User` はこれを 1 本の `Option` で
/// 保持するため、`deleted_at` と `deleted_by` の片方だけが設定された
/// 状態は構造上存在しない。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionStamp {
    deleted_at: DateTime<Utc>,
    deleted_by: ActorId,
}

impl DeletionStamp {
    /// 削除スタンプを作成する
    pub fn new(deleted_at: DateTime<Utc>, deleted_by: ActorId) -> Self {
        Self {
            deleted_at,
            deleted_by,
        }
    }

    pub fn deleted_at(&self) -> DateTime<Utc> {
        self.deleted_at
    }

    pub fn deleted_by(&self) -> &ActorId {
        &self.deleted_by
    }
}

/// ユーザーエンティティ
///
/// ライフサイクル: `ACTIVE → (論理削除) → SOFT_DELETED → (復元) → ACTIVE`。
/// 保持期間を過ぎた SOFT_DELETED レコードはクリーンアップジョブが
/// 物理削除し、以後このエンティティは存在しない。
///
/// # 不変条件
///
/// - 作成・論理削除・復元・物理削除は本コアのコンポーネント経由でのみ行う
/// - `deletion` が `Some` のレコードはデフォルトの検索経路に現れない
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    id: UserId,
    email: Email,
    name: UserName,
    deletion: Option<DeletionStamp>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl User {
    /// 新しいユーザーを作成する
    ///
    /// 作成時は必ずアクティブ（`deletion == None`）。
    /// `now` は呼び出し元から注入する。
    pub fn new(id: UserId, email: Email, name: UserName, now: DateTime<Utc>) -> Self {
        Self {
            id,
            email,
            name,
            deletion: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 既存のデータからユーザーを復元する（データベースから取得時）
    pub fn from_db(
        id: UserId,
        email: Email,
        name: UserName,
        deletion: Option<DeletionStamp>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            email,
            name,
            deletion,
            created_at,
            updated_at,
        }
    }

    // Getter メソッド

    pub fn id(&self) -> &UserId {
        &self.id
    }

    pub fn email(&self) -> &Email {
        &self.email
    }

    pub fn name(&self) -> &UserName {
        &self.name
    }

    pub fn deletion(&self) -> Option<&DeletionStamp> {
        self.deletion.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    // ビジネスロジックメソッド

    /// 論理削除済みか判定する
    pub fn is_deleted(&self) -> bool {
        self.deletion.is_some()
    }

    /// 論理削除した新しいインスタンスを返す
    pub fn soft_deleted(self, deleted_by: ActorId, now: DateTime<Utc>) -> Self {
        Self {
            deletion: Some(DeletionStamp::new(now, deleted_by)),
            updated_at: now,
            ..self
        }
    }

    /// 復元した新しいインスタンスを返す
    ///
    /// アクティブなレコードへの復元は前提条件違反。復元は状態遷移で
    /// あり、冪等なセッターではない。
    pub fn restored(self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        if self.deletion.is_none() {
            return Err(DomainError::InvalidTransition(
                "削除されていないレコードは復元できません".to_string(),
            ));
        }
        Ok(Self {
            deletion: None,
            updated_at: now,
            ..self
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::{fixture, rstest};

    use super::*;

    /// テスト用の固定タイムスタンプ
    #[fixture]
    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[fixture]
    fn active_user(now: DateTime<Utc>) -> User {
        User::new(
            UserId::new(),
            Email::new("user@example.com").unwrap(),
            UserName::new("Test User").unwrap(),
            now,
        )
    }

    // Email のテスト

    #[test]
    fn test_メールアドレスは正常な形式を受け入れる() {
        assert!(Email::new("user@example.com").is_ok());
    }

    #[rstest]
    #[case("", "空文字列")]
    #[case("no-at-sign", "@記号なし")]
    #[case("@example.com", "ローカル部分が空")]
    #[case("user@", "ドメイン部分が空")]
    #[case(&format!("{}@example.com", "a".repeat(256)), "255文字超過")]
    fn test_メールアドレスは不正な形式を拒否する(
        #[case] input: &str,
        #[case] _reason: &str,
    ) {
        assert!(Email::new(input).is_err());
    }

    #[test]
    fn test_マスク表示はローカル部先頭1文字とドメインのみ残す() {
        let email = Email::new("yamada@example.com").unwrap();
        assert_eq!(email.masked(), "y***@example.com");
    }

    #[test]
    fn test_マスク表示は1文字ローカル部でも生値を復元できない() {
        let email = Email::new("a@example.com").unwrap();
        assert_eq!(email.masked(), "a***@example.com");
    }

    // UserName のテスト

    #[test]
    fn test_ユーザー名は空文字列を拒否する() {
        assert!(UserName::new("").is_err());
    }

    #[test]
    fn test_ユーザー名は100文字を超えると拒否する() {
        assert!(UserName::new("あ".repeat(101)).is_err());
        assert!(UserName::new("あ".repeat(100)).is_ok());
    }

    // User のテスト

    #[rstest]
    fn test_新規ユーザーは削除されていない(active_user: User) {
        assert!(!active_user.is_deleted());
        assert_eq!(active_user.deletion(), None);
    }

    #[rstest]
    fn test_論理削除後はスタンプに削除者と削除日時が残る(active_user: User) {
        let deleted_at = DateTime::from_timestamp(1_700_001_000, 0).unwrap();
        let deleted = active_user.soft_deleted(ActorId::new("admin-1"), deleted_at);

        assert!(deleted.is_deleted());
        let stamp = deleted.deletion().unwrap();
        assert_eq!(stamp.deleted_at(), deleted_at);
        assert_eq!(stamp.deleted_by(), &ActorId::new("admin-1"));
        assert_eq!(deleted.updated_at(), deleted_at);
    }

    #[rstest]
    fn test_論理削除と復元の往復で削除状態が元に戻る(active_user: User, now: DateTime<Utc>) {
        let t1 = DateTime::from_timestamp(1_700_001_000, 0).unwrap();
        let t2 = DateTime::from_timestamp(1_700_002_000, 0).unwrap();
        let original = active_user.clone();

        let restored = active_user
            .soft_deleted(ActorId::system(), t1)
            .restored(t2)
            .unwrap();

        assert!(!restored.is_deleted());
        assert_eq!(restored.id(), original.id());
        assert_eq!(restored.email(), original.email());
        assert_eq!(restored.created_at(), now);
        assert_eq!(restored.updated_at(), t2);
    }

    #[rstest]
    fn test_アクティブなレコードの復元は前提条件違反で失敗する(active_user: User, now: DateTime<Utc>) {
        let result = active_user.restored(now);
        assert!(matches!(result, Err(DomainError::InvalidTransition(_))));
    }
}
