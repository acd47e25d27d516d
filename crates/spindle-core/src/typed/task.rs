//! TaskKind trait - 型付き task の定義
//!
//! `const TYPE` が task_type の文字列と payload の型を対応付ける。
//! 文字列を手で書く箇所を登録時の一箇所に閉じ込められる。

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::TaskType;

/// A payload type bound to one task type tag.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SendEmail {
///     to: String,
///     subject: String,
/// }
///
/// impl TaskKind for SendEmail {
///     const TYPE: &'static str = "email";
/// }
/// ```
///
/// # Trait Bounds
/// - `Serialize`: submit 時に payload へ変換するため
/// - `DeserializeOwned`: 実行時に payload から復元するため
/// - `Send + Sync + 'static`: worker の tokio task へ渡すため
pub trait TaskKind: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE: &'static str;

    fn task_type() -> TaskType {
        TaskType::new(Self::TYPE)
    }
}
