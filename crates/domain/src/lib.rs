//! # Kiroku ドメイン層
//!
//! 削除可能レコードのライフサイクルを表現するドメインモデルを定義する。
//!
//! ## 扱う状態遷移
//!
//! ```text
//! ACTIVE → (論理削除) → SOFT_DELETED → (復元) → ACTIVE
//!                       SOFT_DELETED → (保持期間経過後パージ) → 消滅
//! ```
//!
//! ## 設計方針
//!
//! - **エンティティ**: 一意の識別子を持つオブジェクト（例: [`user::User`]）
//! - **値オブジェクト**: 生成時にバリデーションを行う不変オブジェクト
//!   （例: [`user::Email`], [`retention::RetentionPeriod`]）
//! - **不変条件の型による強制**: `deleted_at` / `deleted_by` のペア制約は
//!   [`user::DeletionStamp`] を `Option` で持つことで構造的に保証する
//! - **ドメインエラー**: ビジネスルール違反を [`DomainError`] で表現する
//!
//! ## 依存関係の方向
//!
//! ```text
//! service → infra → domain
//! ```
//!
//! ドメイン層はインフラ層（DB、外部サービス）に一切依存しない。

pub mod actor;
pub mod audit;
pub mod clock;
pub mod error;
pub mod operation;
pub mod retention;
pub mod user;

pub use error::DomainError;
