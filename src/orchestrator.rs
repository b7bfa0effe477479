//! # Orchestrator モジュール
//!
//! エピソードの開始・終了、報酬の帰属、ワールドのリセットを決定する
//! 環境の中枢です。
//!
//! ## フェーズ
//!
//! `Idle → Resetting → Active → Ending → Resetting → Active → …`
//!
//! - `Idle`: 初回リセット前のみ
//! - `Resetting`: レジストリの再配置待ち。報酬は加算せず、ティック数は0のまま
//! - `Active`: ティックを数え、整形報酬と接触イベントを受け付ける
//! - `Ending`: エピソードごとに1回だけ入る。最終報酬と防衛成功ボーナスを
//!   適用した後、即座に `Resetting` へ戻る
//!
//! ## 終了要因の競合
//!
//! 捕獲・母艦衝突・味方衝突・全滅・タイムアウト・隊形崩れは、すべて
//! `request_termination` を経由します。最初の呼び出しだけが有効で、
//! 同じエピソード内の後続の呼び出しはログを残して捨てられます。
//!
//! ## ティック内の処理順序
//!
//! 1. 前ティックに予約された破棄の反映
//! 2. 接触イベントの処理（終了が決まればここで打ち切り）
//! 3. ティック計数・終了判定・リング判定・整形報酬

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::collision::{
    AdversarySighting, CollisionCooldowns, CollisionRouter, ContactRoster, CooldownKey, DomainEvent,
};
use crate::models::agent::AgentPair;
use crate::models::barrier::{CaptureBarrier, FlagshipUnit};
use crate::models::common::{AdversaryKey, KinematicSnapshot, Vec2};
use crate::models::traits::WorldPhysics;
use crate::registry::{EntityRegistry, ResetState};
use crate::reward::RewardShaper;
use crate::scenario::ScenarioConfig;

/// 外側リングのインデックス
pub const OUTER_RING: usize = 0;
/// 最内リングのインデックス（侵入で防衛成功ボーナスを失う）
pub const INNER_RING: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodePhase {
    Idle,
    Resetting,
    Active,
    Ending,
}

/// エピソード終了要因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Capture,
    FlagshipCollision,
    FriendlyCollision,
    AllAdversariesDestroyed,
    Timeout,
    FormationBroken,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::Capture => "capture",
            TerminationReason::FlagshipCollision => "flagship_collision",
            TerminationReason::FriendlyCollision => "friendly_collision",
            TerminationReason::AllAdversariesDestroyed => "all_adversaries_destroyed",
            TerminationReason::Timeout => "timeout",
            TerminationReason::FormationBroken => "formation_broken",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 終了したエピソードの記録
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeSummary {
    pub index: u32,
    pub reason: TerminationReason,
    pub ticks: u64,
    pub total_reward: f64,
    pub captures: u32,
    pub rings_breached: usize,
    /// 最内リングへの侵入がなく、防衛成功ボーナスを得た
    pub defended: bool,
}

/// 1ステップの結果（両艇共通のグループ報酬）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    pub reward: f64,
    pub done: bool,
    pub reason: Option<TerminationReason>,
}

/// エピソード制御
#[derive(Debug)]
pub struct EpisodeOrchestrator {
    config: Arc<ScenarioConfig>,
    shaper: RewardShaper,
    router: CollisionRouter,
    registry: EntityRegistry,
    agents: AgentPair,
    flagship: FlagshipUnit,

    phase: EpisodePhase,
    ending_latch: bool,
    tick_count: u64,
    clock_s: f64,
    episode_index: u32,

    ring_flags: [bool; 2],
    inner_breach: bool,
    capture_count: u32,
    cooldowns: CollisionCooldowns,
    previous_nearest: Option<f64>,
    barrier: Option<CaptureBarrier>,

    ended_this_step: Option<TerminationReason>,
    summaries: Vec<EpisodeSummary>,
}

impl EpisodeOrchestrator {
    pub fn new(
        config: Arc<ScenarioConfig>,
        agents: AgentPair,
        registry: EntityRegistry,
        flagship: FlagshipUnit,
    ) -> Self {
        Self {
            shaper: RewardShaper::new(config.clone()),
            router: CollisionRouter::new(config.clone()),
            cooldowns: CollisionCooldowns::new(config.episode.collision_cooldown_s),
            config,
            registry,
            agents,
            flagship,
            phase: EpisodePhase::Idle,
            ending_latch: false,
            tick_count: 0,
            clock_s: 0.0,
            episode_index: 0,
            ring_flags: [false; 2],
            inner_breach: false,
            capture_count: 0,
            previous_nearest: None,
            barrier: None,
            ended_this_step: None,
            summaries: Vec::new(),
        }
    }

    pub fn phase(&self) -> EpisodePhase {
        self.phase
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// 現在（または直近）のエピソード番号。初回リセット完了で1になる。
    pub fn episode_index(&self) -> u32 {
        self.episode_index
    }

    pub fn capture_count(&self) -> u32 {
        self.capture_count
    }

    pub fn ring_flags(&self) -> [bool; 2] {
        self.ring_flags
    }

    pub fn inner_breach(&self) -> bool {
        self.inner_breach
    }

    pub fn barrier(&self) -> Option<&CaptureBarrier> {
        self.barrier.as_ref()
    }

    pub fn agents(&self) -> &AgentPair {
        &self.agents
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn flagship(&self) -> &FlagshipUnit {
        &self.flagship
    }

    pub fn config(&self) -> &Arc<ScenarioConfig> {
        &self.config
    }

    pub fn summaries(&self) -> &[EpisodeSummary] {
        &self.summaries
    }

    /// 新しいエピソードを開始する（完了は `tick` のポーリングで検知）
    ///
    /// `Active` 中や、リセットがすでに進行中の呼び出しは何もしません。
    pub fn begin_episode(&mut self) -> bool {
        match self.phase {
            EpisodePhase::Active => {
                debug!("エピソード進行中のため開始要求を無視");
                return false;
            }
            EpisodePhase::Resetting
                if matches!(
                    self.registry.reset_state(),
                    ResetState::Repositioning | ResetState::Settling { .. }
                ) =>
            {
                debug!("リセット進行中のため開始要求を無視");
                return false;
            }
            _ => {}
        }

        self.ring_flags = [false; 2];
        self.inner_breach = false;
        self.capture_count = 0;
        self.cooldowns.clear();
        self.previous_nearest = None;
        self.barrier = None;
        self.tick_count = 0;
        self.registry.begin_reset();
        self.phase = EpisodePhase::Resetting;
        debug!("リセット開始 (次エピソード {})", self.episode_index + 1);
        true
    }

    fn poll_reset(&mut self, world: &mut dyn WorldPhysics) {
        if self.registry.reset_state() == ResetState::Repositioning {
            self.agents.reposition(world);
        }
        if self.registry.advance_reset(world) != ResetState::Done {
            return;
        }

        self.agents.begin_episode();
        self.ending_latch = false;
        self.episode_index += 1;
        self.phase = EpisodePhase::Active;
        info!(
            "エピソード {} 開始: 敵艇 {}隻",
            self.episode_index,
            self.registry.live_count()
        );
    }

    /// すべての終了要因の唯一の入口。最初の呼び出しだけが有効。
    pub fn request_termination(&mut self, reason: TerminationReason, final_reward: Option<f64>) -> bool {
        if self.phase != EpisodePhase::Active || self.ending_latch {
            debug!("終了要求を破棄: {} (phase={:?})", reason, self.phase);
            return false;
        }
        self.ending_latch = true;
        self.phase = EpisodePhase::Ending;

        if let Some(reward) = final_reward {
            self.agents.add_group_reward(reward);
        }
        let defended = !self.inner_breach;
        if defended {
            self.agents.add_group_reward(self.config.rings.defense_success_reward);
        }
        self.agents.conclude_episode();

        let total_reward = self.agents.get(0).map_or(0.0, |a| a.cumulative_reward);
        let summary = EpisodeSummary {
            index: self.episode_index,
            reason,
            ticks: self.tick_count,
            total_reward,
            captures: self.capture_count,
            rings_breached: self.ring_flags.iter().filter(|&&f| f).count(),
            defended,
        };
        info!(
            "エピソード {} 終了: {} ({}ティック, 報酬 {:.3}, 捕獲 {})",
            summary.index, summary.reason, summary.ticks, summary.total_reward, summary.captures
        );
        self.summaries.push(summary);
        self.ended_this_step = Some(reason);

        self.begin_episode();
        true
    }

    /// 1ステップ：予約済み破棄の反映 → 接触処理 → ティック
    pub fn step(&mut self, world: &mut dyn WorldPhysics, dt: f64) -> StepOutcome {
        self.agents.begin_step();
        self.ended_this_step = None;

        self.registry.flush_pending(world);
        let contacts = world.drain_contacts();

        if self.phase == EpisodePhase::Active {
            self.barrier = self.project_barrier(world);
            let sightings = self.sightings(world);
            let mut contacts = contacts;
            if let Some(barrier) = &self.barrier {
                contacts.extend(self.router.barrier_contacts(barrier, &sightings));
            }

            for contact in &contacts {
                if self.phase != EpisodePhase::Active {
                    break;
                }
                let roster = ContactRoster {
                    agents: self.agents.entities(),
                    flagship: self.flagship.entity,
                    registry: &self.registry,
                };
                let event = self.router.route(
                    contact,
                    &roster,
                    self.barrier.as_ref(),
                    &mut self.cooldowns,
                    self.clock_s,
                );
                if let Some(event) = event {
                    self.dispatch(event);
                }
            }
        } else if !contacts.is_empty() {
            trace!("非アクティブ中の接触 {}件を破棄", contacts.len());
        }

        self.tick(dt, world);

        let reward = self.agents.get(0).map_or(0.0, |a| a.last_step_reward);
        StepOutcome {
            reward,
            done: self.ended_this_step.is_some(),
            reason: self.ended_this_step,
        }
    }

    fn dispatch(&mut self, event: DomainEvent) {
        match event {
            DomainEvent::Capture { adversary, impact } => {
                self.apply_capture(adversary, impact);
            }
            DomainEvent::FlagshipCollision { adversary } => {
                self.on_flagship_collision(adversary);
            }
            DomainEvent::FriendlyCollision { source, target } => {
                debug!("味方衝突: {} -> {}", source, target);
                self.on_friendly_collision();
            }
        }
    }

    /// ティックを進める
    ///
    /// `Resetting` 中はリセットの完了を確認するだけで、ティック数は増えません。
    pub fn tick(&mut self, dt: f64, world: &mut dyn WorldPhysics) {
        match self.phase {
            EpisodePhase::Resetting => {
                self.poll_reset(world);
                return;
            }
            EpisodePhase::Idle | EpisodePhase::Ending => return,
            EpisodePhase::Active => {}
        }

        self.tick_count += 1;
        self.clock_s += dt;

        if self.tick_count >= self.config.episode.max_ticks {
            self.request_termination(TerminationReason::Timeout, None);
            return;
        }

        let snapshots = self.agents.snapshots(world);
        if let [Some(first), Some(second)] = snapshots {
            let separation = first.position.distance(&second.position);
            if separation > self.config.episode.max_ally_separation_m {
                debug!("味方艇間距離 {:.1}m が上限を超過", separation);
                self.request_termination(
                    TerminationReason::FormationBroken,
                    Some(self.config.episode.formation_broken_penalty),
                );
                return;
            }
        }

        let sightings = self.sightings(world);
        self.check_rings(&sightings);

        if self.config.episode.end_on_all_destroyed
            && !self.registry.is_empty()
            && self.registry.surviving_count() == 0
            && self.on_all_adversaries_destroyed(world)
        {
            return;
        }

        self.barrier = self.project_barrier(world);
        let adversaries: Vec<KinematicSnapshot> = sightings.iter().map(|s| s.snapshot).collect();
        let score = self
            .shaper
            .score(snapshots, self.barrier.as_ref(), &adversaries, self.previous_nearest);
        self.previous_nearest = score.nearest_distance;
        self.agents.add_group_reward(score.total());
        trace!(
            "tick {}: coop={:.5} tac={:.5} safety={:.5}",
            self.tick_count, score.cooperative, score.tactical, score.safety
        );
    }

    fn check_rings(&mut self, sightings: &[AdversarySighting]) {
        let radii = self.config.rings.radii();
        for sighting in sightings {
            let distance = sighting.snapshot.position.distance(&self.flagship.position);
            for (ring, radius) in radii.iter().enumerate() {
                if distance <= *radius {
                    self.on_adversary_boundary_crossed(ring);
                }
            }
        }
    }

    /// リングごとに1エピソード1回だけペナルティを与える
    pub fn on_adversary_boundary_crossed(&mut self, ring: usize) -> bool {
        if self.phase != EpisodePhase::Active {
            return false;
        }
        let Some(flag) = self.ring_flags.get_mut(ring) else {
            warn!("未定義のリング番号: {}", ring);
            return false;
        };
        if *flag {
            return false;
        }
        *flag = true;
        if ring == INNER_RING {
            self.inner_breach = true;
        }
        self.agents.add_group_reward(self.config.rings.breach_penalty);
        info!("リング {} への侵入 (ペナルティ {:.2})", ring, self.config.rings.breach_penalty);
        true
    }

    /// 網による捕獲
    ///
    /// 捕獲報酬は基本値と網中心への近さに応じたボーナスの和。
    /// 終了捕獲回数に達したときだけエピソードを終了します。
    /// 同じ敵艇への通知はクールダウン窓内では1回だけ数え、
    /// 破棄・再生成待ちの個体への通知は無視します。
    pub fn on_capture_event(&mut self, adversary: AdversaryKey, impact: Vec2) -> bool {
        if self.phase != EpisodePhase::Active || !self.registry.is_live(adversary) {
            return false;
        }
        if !self.cooldowns.try_accept(CooldownKey::Capture(adversary), self.clock_s) {
            debug!("クールダウン中の捕獲通知を破棄: {}", adversary);
            return false;
        }
        self.apply_capture(adversary, impact)
    }

    /// ルーターでクールダウン適用済みの捕獲
    fn apply_capture(&mut self, adversary: AdversaryKey, impact: Vec2) -> bool {
        if self.phase != EpisodePhase::Active || !self.registry.is_live(adversary) {
            return false;
        }
        let capture = &self.config.capture;
        let bonus = match &self.barrier {
            Some(barrier) => {
                let distance = impact.distance(&barrier.midpoint);
                let max = capture.center_bonus_max_distance_m;
                if distance < max { capture.center_bonus * (1.0 - distance / max) } else { 0.0 }
            }
            None => 0.0,
        };
        let reward = capture.base_reward + bonus;

        if capture.respawn_captured {
            self.registry.respawn(adversary);
        } else {
            self.registry.destroy(adversary);
        }
        self.capture_count += 1;
        info!("捕獲 {}: {} (報酬 {:.3})", self.capture_count, adversary, reward);

        if self.capture_count >= capture.terminal_capture_count() {
            self.request_termination(TerminationReason::Capture, Some(reward))
        } else {
            self.agents.add_group_reward(reward);
            false
        }
    }

    /// 敵艇の母艦衝突。常に終了。
    pub fn on_flagship_collision(&mut self, adversary: AdversaryKey) -> bool {
        if self.phase != EpisodePhase::Active {
            return false;
        }
        warn!("母艦衝突: {}", adversary);
        self.inner_breach = true;
        self.registry.destroy(adversary);
        self.request_termination(
            TerminationReason::FlagshipCollision,
            Some(self.config.penalties.flagship_collision),
        )
    }

    pub fn on_friendly_collision(&mut self) -> bool {
        self.request_termination(
            TerminationReason::FriendlyCollision,
            Some(self.config.penalties.friendly_collision),
        )
    }

    /// 敵艇全滅による成功終了
    ///
    /// 帳簿上の生存数が0なら物理側と突き合わせ直してから判断します。
    /// 再生成待ちの個体は生存として数えます。
    pub fn on_all_adversaries_destroyed(&mut self, world: &dyn WorldPhysics) -> bool {
        if !self.config.episode.end_on_all_destroyed || self.phase != EpisodePhase::Active {
            return false;
        }
        let mut live = self.registry.surviving_count();
        if live == 0 {
            self.registry.resync(world);
            live = self.registry.surviving_count();
        }
        if live > 0 {
            warn!("全滅判定を取り消し: 再走査で {}隻の生存を確認", live);
            return false;
        }
        self.request_termination(TerminationReason::AllAdversariesDestroyed, None)
    }

    /// 生存敵艇の観測
    pub fn sightings(&self, world: &dyn WorldPhysics) -> Vec<AdversarySighting> {
        self.registry
            .live_handles()
            .filter_map(|(key, entity, radius_m)| {
                let pose = world.get_pose(entity)?;
                Some(AdversarySighting { key, entity, snapshot: KinematicSnapshot::from(pose), radius_m })
            })
            .collect()
    }

    fn project_barrier(&self, world: &dyn WorldPhysics) -> Option<CaptureBarrier> {
        match self.agents.snapshots(world) {
            [Some(first), Some(second)] => Some(CaptureBarrier::project(&first, &second, &self.config.barrier)),
            _ => None,
        }
    }
}
