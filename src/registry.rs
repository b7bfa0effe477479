//! # Registry モジュール
//!
//! 敵艇の名前キー・テンプレート・初期配置を保持し、破棄と再生成を
//! またいで物理側の個体群を一貫させます。
//!
//! ## 不変条件
//!
//! - 初期配置は名前ごとに初回登録時の1回だけ書き込まれる
//! - リセット完了後、登録済みの全キーがちょうど1つの生存インスタンスを
//!   初期配置・速度ゼロで持つ
//! - 破棄済みのインスタンスは再利用せず、テンプレートから作り直す
//!
//! ## リセットの進行
//!
//! `begin_reset` の後、`advance_reset` をティックごとに1回呼びます。
//! `NotStarted → Repositioning → Settling → Done` と進み、物理側の
//! 落ち着きを待つため複数ティックにまたがります。

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::models::adversary::{AdversaryRecord, AdversaryTemplate, Placement};
use crate::models::common::{AdversaryKey, EntityId, Vec2};
use crate::models::traits::WorldPhysics;
use crate::scenario::ScenarioConfig;

/// 再生成用乱数のシード混合定数
const RESPAWN_SEED_MIX: u64 = 0x9e37_79b9_7f4a_7c15;

/// 全敵艇リセットの進行状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetState {
    NotStarted,
    /// 次の `advance_reset` で全個体を再配置する
    Repositioning,
    /// 再配置済み。残りティック数だけ物理側の落ち着きを待つ
    Settling { remaining: u32 },
    Done,
}

/// 敵艇レジストリ
///
/// 敵艇の生存状態と配置を変更するのはこの型だけです。
#[derive(Debug)]
pub struct EntityRegistry {
    config: Arc<ScenarioConfig>,
    records: Vec<AdversaryRecord>,
    by_name: HashMap<String, AdversaryKey>,
    by_handle: HashMap<EntityId, AdversaryKey>,
    reset_state: ResetState,
    rng: SmallRng,
}

impl EntityRegistry {
    pub fn new(config: Arc<ScenarioConfig>) -> Self {
        let rng = SmallRng::seed_from_u64(config.sim.seed ^ RESPAWN_SEED_MIX);
        Self {
            config,
            records: Vec::new(),
            by_name: HashMap::new(),
            by_handle: HashMap::new(),
            reset_state: ResetState::NotStarted,
            rng,
        }
    }

    /// 敵艇を登録してキーを返す
    ///
    /// 同じ名前の2回目以降の登録は初期配置とテンプレートを上書きせず、
    /// 生存ハンドルだけを更新します。
    pub fn register(
        &mut self,
        name: &str,
        template: AdversaryTemplate,
        placement: Placement,
        handle: Option<EntityId>,
    ) -> AdversaryKey {
        if let Some(&key) = self.by_name.get(name) {
            if let Some(handle) = handle {
                self.attach(key, handle);
            }
            debug!("敵艇 {} は登録済み ({}), 初期配置は保持", name, key);
            return key;
        }

        let key = AdversaryKey(self.records.len() as u32);
        if placement.is_degenerate() {
            warn!("敵艇 {} の初期配置が不正です: {:?} (リセット時は既定配置を使用)", name, placement.position);
        }
        self.records.push(AdversaryRecord::new(key, name.to_string(), template, placement, handle));
        self.by_name.insert(name.to_string(), key);
        if let Some(handle) = handle {
            self.by_handle.insert(handle, key);
        }
        debug!("敵艇登録: {} -> {}", name, key);
        key
    }

    fn attach(&mut self, key: AdversaryKey, handle: EntityId) {
        let Some(record) = self.records.get_mut(key.0 as usize) else {
            return;
        };
        if let Some(previous) = record.handle.replace(handle) {
            self.by_handle.remove(&previous);
        }
        record.alive = true;
        record.pending_destroy = false;
        self.by_handle.insert(handle, key);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[AdversaryRecord] {
        &self.records
    }

    pub fn record(&self, key: AdversaryKey) -> Option<&AdversaryRecord> {
        self.records.get(key.0 as usize)
    }

    pub fn key_by_name(&self, name: &str) -> Option<AdversaryKey> {
        self.by_name.get(name).copied()
    }

    /// 物理ハンドルから安定キーを引く
    pub fn key_of(&self, handle: EntityId) -> Option<AdversaryKey> {
        self.by_handle.get(&handle).copied()
    }

    pub fn is_live(&self, key: AdversaryKey) -> bool {
        self.record(key).is_some_and(AdversaryRecord::is_live)
    }

    /// 生存していて破棄予定でもない個体の数
    pub fn live_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_live()).count()
    }

    /// 生存数に再生成待ちの個体を加えた数。全滅判定はこちらを使う。
    pub fn surviving_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_live() || r.respawn_requested).count()
    }

    /// 生存個体の（キー, ハンドル, 半径）
    pub fn live_handles(&self) -> impl Iterator<Item = (AdversaryKey, EntityId, f64)> + '_ {
        self.records
            .iter()
            .filter(|r| r.is_live())
            .filter_map(|r| r.handle.map(|h| (r.key, h, r.template.radius_m)))
    }

    pub fn reset_state(&self) -> ResetState {
        self.reset_state
    }

    /// 破棄を予約する。物理側からの除去は次のティック境界。
    pub fn destroy(&mut self, key: AdversaryKey) -> bool {
        let Some(record) = self.records.get_mut(key.0 as usize) else {
            return false;
        };
        if !record.is_live() {
            return false;
        }
        record.alive = false;
        record.pending_destroy = true;
        debug!("敵艇 {} ({}) の破棄を予約", record.name, key);
        true
    }

    /// 破棄を予約し、除去直後にテンプレートから再生成させる
    pub fn respawn(&mut self, key: AdversaryKey) -> bool {
        if !self.destroy(key) {
            return false;
        }
        if let Some(record) = self.records.get_mut(key.0 as usize) {
            record.respawn_requested = true;
        }
        true
    }

    /// ティック境界での破棄・再生成処理。処理した件数を返す。
    pub fn flush_pending(&mut self, world: &mut dyn WorldPhysics) -> usize {
        let jitter_radius = self.config.capture.respawn_jitter_radius_m;
        let default_placement = &self.config.default_placement;
        let mut processed = 0;

        for record in self.records.iter_mut().filter(|r| r.pending_destroy) {
            if let Some(handle) = record.handle.take() {
                world.destroy(handle);
                self.by_handle.remove(&handle);
            }
            record.pending_destroy = false;
            processed += 1;

            if record.respawn_requested {
                record.respawn_requested = false;
                let placement = resolve_placement(record, default_placement);
                let position = placement.position + jitter_offset(&mut self.rng, jitter_radius);
                let handle = world.instantiate(&record.template, position, placement.heading_deg);
                world.reset_path(handle, placement.path.as_ref());
                record.handle = Some(handle);
                record.alive = true;
                self.by_handle.insert(handle, record.key);
                debug!("敵艇 {} を再生成: {} at ({:.1}, {:.1})", record.name, handle, position.x, position.y);
            }
        }

        processed
    }

    /// 全敵艇リセットを開始する
    pub fn begin_reset(&mut self) {
        self.reset_state = ResetState::Repositioning;
    }

    /// リセットを1段階進める
    pub fn advance_reset(&mut self, world: &mut dyn WorldPhysics) -> ResetState {
        self.reset_state = match self.reset_state {
            ResetState::NotStarted => ResetState::NotStarted,
            ResetState::Done => ResetState::Done,
            ResetState::Repositioning => {
                self.reposition_all(world);
                ResetState::Settling { remaining: self.config.episode.settle_ticks }
            }
            ResetState::Settling { remaining } if remaining > 0 => ResetState::Settling { remaining: remaining - 1 },
            ResetState::Settling { .. } => {
                if self.all_placed(world) {
                    info!("敵艇リセット完了: {}隻", self.records.len());
                    ResetState::Done
                } else {
                    warn!("リセット後に生存していない敵艇があるため再配置します");
                    ResetState::Repositioning
                }
            }
        };
        self.reset_state
    }

    fn reposition_all(&mut self, world: &mut dyn WorldPhysics) {
        let default_placement = &self.config.default_placement;

        for record in &mut self.records {
            let placement = resolve_placement(record, default_placement);

            // 破棄予約中の個体は再利用せず作り直す
            if record.pending_destroy {
                if let Some(handle) = record.handle.take() {
                    world.destroy(handle);
                    self.by_handle.remove(&handle);
                }
                record.pending_destroy = false;
            }
            record.respawn_requested = false;

            match record.handle {
                Some(handle) if world.contains(handle) => {
                    world.set_pose(handle, placement.position, placement.heading_deg);
                    world.zero_velocity(handle);
                    world.reset_path(handle, placement.path.as_ref());
                }
                stale => {
                    if let Some(stale) = stale {
                        self.by_handle.remove(&stale);
                    }
                    let handle = world.instantiate(&record.template, placement.position, placement.heading_deg);
                    world.zero_velocity(handle);
                    world.reset_path(handle, placement.path.as_ref());
                    record.handle = Some(handle);
                    self.by_handle.insert(handle, record.key);
                    debug!("敵艇 {} をテンプレートから生成: {}", record.name, handle);
                }
            }
            record.alive = true;
        }
    }

    fn all_placed(&self, world: &dyn WorldPhysics) -> bool {
        self.records
            .iter()
            .all(|r| r.is_live() && r.handle.is_some_and(|h| world.contains(h)))
    }

    /// 物理側の実在と突き合わせて帳簿を修正し、生存数を返す
    pub fn resync(&mut self, world: &dyn WorldPhysics) -> usize {
        for record in &mut self.records {
            match record.handle {
                Some(handle) if !world.contains(handle) => {
                    warn!("敵艇 {} のハンドル {} は物理側に存在しません", record.name, handle);
                    self.by_handle.remove(&handle);
                    record.handle = None;
                    record.alive = false;
                    // 再生成待ちなら次の flush_pending で作り直させる
                    record.pending_destroy = record.respawn_requested;
                }
                Some(handle) if !record.alive && !record.pending_destroy => {
                    warn!("敵艇 {} は破棄扱いですが {} が実在するため生存に戻します", record.name, handle);
                    record.alive = true;
                }
                _ => {}
            }
        }
        self.live_count()
    }
}

/// 保存配置が壊れていれば既定配置へ差し替える
fn resolve_placement(record: &AdversaryRecord, default_placement: &Placement) -> Placement {
    if record.original.is_degenerate() {
        warn!("敵艇 {} の初期配置が不正なため既定配置を使用", record.name);
        return default_placement.clone();
    }
    record.original.clone()
}

/// 半径 `radius` の円内の一様乱数オフセット
fn jitter_offset(rng: &mut SmallRng, radius: f64) -> Vec2 {
    if radius <= 0.0 {
        return Vec2::ZERO;
    }
    let r = radius * rng.gen_range(0.0f64..1.0).sqrt();
    let theta = rng.gen_range(0.0..std::f64::consts::TAU);
    Vec2::new(r * theta.cos(), r * theta.sin())
}
