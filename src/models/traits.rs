use crate::collision::Contact;
use crate::models::{
    adversary::{AdversaryTemplate, PathRef},
    agent::ActionCommand,
    common::{EntityId, Pose, Vec2},
};

/// 物理・ワールド側コラボレータのインターフェース
///
/// 剛体積分・航路追従・接触判定は実装側の責務で、エピソード制御は
/// このトレイト越しにのみワールドへ触れます。存在しないIDに対する
/// 書き込み系メソッドは何もしないこと。
pub trait WorldPhysics {
    /// 姿勢の取得（存在しない場合は None）
    fn get_pose(&self, id: EntityId) -> Option<Pose>;

    /// 位置・方位の設定
    fn set_pose(&mut self, id: EntityId, position: Vec2, heading_deg: f64);

    /// 線速度・角速度をゼロにする
    fn zero_velocity(&mut self, id: EntityId);

    /// テンプレートから新しいインスタンスを生成
    fn instantiate(&mut self, template: &AdversaryTemplate, position: Vec2, heading_deg: f64) -> EntityId;

    /// インスタンスを破棄
    fn destroy(&mut self, id: EntityId);

    /// インスタンスが物理側に存在するか
    fn contains(&self, id: EntityId) -> bool;

    /// 航路追従の進捗を始点に戻す（航路の付け替えを含む）
    fn reset_path(&mut self, id: EntityId, path: Option<&PathRef>);

    /// 味方艇への操舵指令。`ActionCommand` は構築時点で検証済み。
    fn apply_command(&mut self, id: EntityId, command: ActionCommand);

    /// 前回呼び出し以降に発生した接触通知を取り出す
    fn drain_contacts(&mut self) -> Vec<Contact>;
}
