//! # 監査ログ
//!
//! 削除ライフサイクル操作の監査証跡を記録するドメインモデル。
//!
//! ## 設計方針
//!
//! - **不変性**: 監査ログは一度作成されたら変更・削除されない
//! - **アクションとメタデータの整合**: エントリはアクション別の
//!   コンストラクタ経由でのみ作成し、アクションと合わないメタデータを
//!   持つエントリを型レベルで作成不能にする
//! - **行データ非記録**: 一括削除のメタデータにはフィルタの形だけを
//!   記録し、該当行の内容は記録しない
//!
//! ## アクション体系
//!
//! アクションは `リソース.操作` 形式の文字列に変換される:
//!
//! | バリアント | 文字列表現 |
//! |-----------|-----------|
//! | `Delete` | `record.delete` |
//! | `DeleteMany` | `record.delete_many` |
//! | `Restore` | `record.restore` |
//! | `HardDelete` | `record.hard_delete` |

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    actor::ActorId,
    operation::OperationContext,
    user::{DeletionStamp, UserId},
};

/// ユーザーレコードの target_type 値
pub const TARGET_TYPE_USER: &str = "user";

/// 一括削除エントリの target_id 値（個別対象を持たない）
pub const TARGET_ID_BULK: &str = "*";

/// 監査対象のアクション
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    /// 論理削除
    Delete,
    /// 一括論理削除
    DeleteMany,
    /// 復元
    Restore,
    /// 物理削除（保持期間経過後のパージ）
    HardDelete,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Delete => "record.delete",
            Self::DeleteMany => "record.delete_many",
            Self::Restore => "record.restore",
            Self::HardDelete => "record.hard_delete",
        };
        write!(f, "{s}")
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "record.delete" => Ok(Self::Delete),
            "record.delete_many" => Ok(Self::DeleteMany),
            "record.restore" => Ok(Self::Restore),
            "record.hard_delete" => Ok(Self::HardDelete),
            _ => Err(format!("不明な監査アクション: {s}")),
        }
    }
}

/// 一括削除フィルタの形
///
/// どの述語が指定されたかだけを記録する。`name_contains` のような
/// 利用者入力を含む述語は、指定有無のフラグに落とす。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterShape {
    /// 名前部分一致述語が指定されたか
    pub name_contains:  bool,
    /// 作成日時上限述語（日時そのものは利用者入力ではないため記録する）
    pub created_before: Option<DateTime<Utc>>,
}

/// アクション種別ごとの監査メタデータ
///
/// `jsonb` カラムには `kind` タグ付きで直列化される。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditMetadata {
    /// 論理削除: システム起因か利用者起因か
    Delete {
        system_initiated: bool,
    },
    /// 一括論理削除: フィルタの形と該当件数
    DeleteMany {
        filter:        FilterShape,
        matched_count: u64,
    },
    /// 復元: 元の削除のタイムスタンプと削除者（来歴の連鎖）
    Restore {
        original_deleted_at: DateTime<Utc>,
        original_deleted_by: ActorId,
    },
    /// 物理削除: 元の削除情報と適用された保持日数
    HardDelete {
        original_deleted_at: DateTime<Utc>,
        original_deleted_by: ActorId,
        retention_days:      i64,
    },
}

/// 監査ログエントリ
///
/// 削除ライフサイクル操作 1 件の監査証跡を表現する不変のエンティティ。
/// 追記専用テーブルに格納され、更新・削除されることはない。
#[derive(Debug, Clone, PartialEq)]
pub struct AuditLogEntry {
    pub id:          Uuid,
    pub actor_id:    Option<ActorId>,
    pub target_id:   String,
    pub target_type: String,
    pub action:      AuditAction,
    pub metadata:    AuditMetadata,
    pub ip_address:  Option<String>,
    pub user_agent:  Option<String>,
    pub created_at:  DateTime<Utc>,
}

impl AuditLogEntry {
    /// 論理削除のエントリを作成する
    ///
    /// アクターは操作コンテキストから取得する。コンテキストに
    /// アクターが載っていない削除は `system_initiated` として記録する。
    pub fn record_delete(target: &UserId, ctx: &OperationContext, now: DateTime<Utc>) -> Self {
        Self {
            id:          Uuid::now_v7(),
            actor_id:    Some(ctx.effective_actor()),
            target_id:   target.to_string(),
            target_type: TARGET_TYPE_USER.to_string(),
            action:      AuditAction::Delete,
            metadata:    AuditMetadata::Delete {
                system_initiated: ctx.actor_id.is_none(),
            },
            ip_address:  ctx.ip_address.clone(),
            user_agent:  ctx.user_agent.clone(),
            created_at:  now,
        }
    }

    /// 一括論理削除のエントリを作成する
    ///
    /// 対象 1 件ごとではなく一括操作につき 1 エントリ。個別対象を
    /// 持たないため `target_id` は [`TARGET_ID_BULK`] になる。
    pub fn record_delete_many(
        filter: FilterShape,
        matched_count: u64,
        ctx: &OperationContext,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id:          Uuid::now_v7(),
            actor_id:    Some(ctx.effective_actor()),
            target_id:   TARGET_ID_BULK.to_string(),
            target_type: TARGET_TYPE_USER.to_string(),
            action:      AuditAction::DeleteMany,
            metadata:    AuditMetadata::DeleteMany {
                filter,
                matched_count,
            },
            ip_address:  ctx.ip_address.clone(),
            user_agent:  ctx.user_agent.clone(),
            created_at:  now,
        }
    }

    /// 復元のエントリを作成する
    ///
    /// 元の削除スタンプを来歴としてメタデータに写す。
    pub fn record_restore(
        target: &UserId,
        restored_by: ActorId,
        original: &DeletionStamp,
        ctx: &OperationContext,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id:          Uuid::now_v7(),
            actor_id:    Some(restored_by),
            target_id:   target.to_string(),
            target_type: TARGET_TYPE_USER.to_string(),
            action:      AuditAction::Restore,
            metadata:    AuditMetadata::Restore {
                original_deleted_at: original.deleted_at(),
                original_deleted_by: original.deleted_by().clone(),
            },
            ip_address:  ctx.ip_address.clone(),
            user_agent:  ctx.user_agent.clone(),
            created_at:  now,
        }
    }

    /// 物理削除のエントリを作成する
    ///
    /// パージ完了「後」に書かれるため、`target_id` は既に存在しない
    /// レコードを指す。クリーンアップジョブの実行であり、アクターは
    /// `system` になる。
    pub fn record_hard_delete(
        target: &UserId,
        original: &DeletionStamp,
        retention_days: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id:          Uuid::now_v7(),
            actor_id:    Some(ActorId::system()),
            target_id:   target.to_string(),
            target_type: TARGET_TYPE_USER.to_string(),
            action:      AuditAction::HardDelete,
            metadata:    AuditMetadata::HardDelete {
                original_deleted_at: original.deleted_at(),
                original_deleted_by: original.deleted_by().clone(),
                retention_days,
            },
            ip_address:  None,
            user_agent:  None,
            created_at:  now,
        }
    }
}
