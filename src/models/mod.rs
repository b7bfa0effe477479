// 基本的なデータ型と数学ユーティリティ
pub mod common;

// 物理・ワールド側コラボレータとの境界（trait）定義
pub mod traits;

// 各エンティティモデルの実装
pub mod agent;
pub mod adversary;
pub mod barrier;
pub mod observation;

// 便利な re-export
pub use common::*;
pub use traits::*;
pub use agent::{ActionCommand, AgentPair, DefenseAgent};
pub use adversary::{AdversaryRecord, AdversaryTemplate, PathRef, Placement};
pub use barrier::{CaptureBarrier, FlagshipUnit};
pub use observation::Observation;
