//! # 保持期間
//!
//! 論理削除されたレコードが復元可能なまま保持される最低期間。
//! 保持期間を過ぎたレコードはクリーンアップジョブのパージ対象になる。

use chrono::{DateTime, Duration, Utc};

use crate::DomainError;

/// 保持日数の下限
const MIN_RETENTION_DAYS: i64 = 1;

/// 保持日数の上限（約 10 年）
const MAX_RETENTION_DAYS: i64 = 3650;

/// 保持期間（値オブジェクト）
///
/// 日単位。1〜3650 日の範囲外は生成時に拒否されるため、
/// ストアアクセスの前に不正な設定が弾かれる。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPeriod(i64);

impl RetentionPeriod {
    /// 保持期間を作成する
    pub fn days(days: i64) -> Result<Self, DomainError> {
        if !(MIN_RETENTION_DAYS..=MAX_RETENTION_DAYS).contains(&days) {
            return Err(DomainError::Validation(format!(
                "保持日数は{MIN_RETENTION_DAYS}〜{MAX_RETENTION_DAYS}日の範囲で指定してください: {days}"
            )));
        }
        Ok(Self(days))
    }

    /// 保持日数を取得する
    pub fn as_days(&self) -> i64 {
        self.0
    }

    /// パージ対象のカットオフ日時を計算する
    ///
    /// `deleted_at <= cutoff`（カットオフちょうども含む）の
    /// レコードがパージ対象になる。
    pub fn cutoff_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(self.0)
    }
}
