//! # 操作コンテキストストア
//!
//! 進行中の操作 ID をキーとして監査用メタデータ
//! （[`OperationContext`]）を保管する、プロセス内の一時ストア。
//!
//! ## 契約
//!
//! - `set` は登録または上書き。冪等。
//! - `get` は未登録キーに対して空のデフォルトを返す。失敗しない。
//! - `clear` は操作終了時（成功・失敗を問わず）に呼ぶ。二重クリアは
//!   no-op。クリア漏れはメモリ増加の原因になるが、キー付き参照の
//!   ため別操作への誤帰属は起こさない。
//!
//! ## 並行性
//!
//! 内部は `Mutex<HashMap>`。各操作は自分のキーのみを読み書きし、
//! ロック区間は挿入・取得・削除の 1 操作に限定される。
//! イテレーションしながらの変更は存在しない。

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use kiroku_domain::operation::{OperationContext, OperationId};

/// 操作コンテキストストア
///
/// `Clone` はストア本体を共有する（`Arc` 内包）。
#[derive(Clone, Default)]
pub struct OperationContextStore {
    contexts: Arc<Mutex<HashMap<OperationId, OperationContext>>>,
}

impl OperationContextStore {
    /// 空のストアを作成する
    pub fn new() -> Self {
        Self::default()
    }

    /// 操作 ID にコンテキストを登録する（既存なら上書き）
    pub fn set(&self, op_id: OperationId, ctx: OperationContext) {
        self.contexts
            .lock()
            .expect("context store mutex poisoned")
            .insert(op_id, ctx);
    }

    /// 操作 ID のコンテキストを取得する
    ///
    /// 未登録の場合は空のデフォルトコンテキストを返す。
    pub fn get(&self, op_id: &OperationId) -> OperationContext {
        self.contexts
            .lock()
            .expect("context store mutex poisoned")
            .get(op_id)
            .cloned()
            .unwrap_or_default()
    }

    /// 操作 ID のコンテキストを削除する
    ///
    /// 未登録キーへの呼び出しは no-op。
    pub fn clear(&self, op_id: &OperationId) {
        self.contexts
            .lock()
            .expect("context store mutex poisoned")
            .remove(op_id);
    }

    /// 保管中のコンテキスト数を返す（クリア漏れ監視用）
    pub fn len(&self) -> usize {
        self.contexts
            .lock()
            .expect("context store mutex poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
