//! # Simulation モジュール
//!
//! 捕獲訓練環境の実行エンジンを提供します。
//!
//! シナリオからワールド・味方艇・敵艇レジストリ・エピソード制御を組み立て、
//! 固定時間刻みのティックループを回します。学習ループからは `step` に
//! 2隻分の行動を渡し、観測・報酬・終了フラグを受け取ります。
//!
//! ## ティック内の処理順序
//!
//! 1. **行動適用**: 両艇の操舵指令をワールドへ渡す（`Active` 中のみ）
//! 2. **物理更新**: ワールドを1刻み進める（リセット中は停止）
//! 3. **エピソード制御**: 接触処理、終了判定、整形報酬
//! 4. **観測生成**: 両艇の観測ベクトル
//!
//! ## 使用例
//!
//! ```no_run
//! use netdefsim::scenario::ScenarioConfig;
//! use netdefsim::simulation::SimulationEngine;
//!
//! let config = ScenarioConfig::from_file("scenarios/single_hit.yaml")?;
//! let mut engine = SimulationEngine::new(config, 1);
//! engine.initialize()?;
//! let report = engine.run()?;
//! report.print_summary();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::models::*;
use crate::orchestrator::{EpisodeOrchestrator, EpisodePhase, EpisodeSummary, TerminationReason};
use crate::registry::EntityRegistry;
use crate::scenario::{ScenarioConfig, ScenarioError};
use crate::world::KinematicWorld;

/// シミュレーション実行エラー
#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Scenario(#[from] ScenarioError),

    #[error("シミュレーションエンジンが初期化されていません")]
    NotInitialized,

    #[error("味方艇の構成が不正です: {0}")]
    AgentSetup(String),
}

/// 味方艇1隻分のステップ結果
#[derive(Debug, Clone, Serialize)]
pub struct AgentStep {
    pub name: String,
    pub observation: Observation,
    pub reward: f64,
    pub done: bool,
}

/// 1ステップ分の結果
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub step: u64,
    pub episode: u32,
    pub tick: u64,
    pub agents: [AgentStep; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination_reason: Option<TerminationReason>,
}

/// 複数エピソード実行の集計
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub seed: u64,
    pub steps: u64,
    pub episodes: Vec<EpisodeSummary>,
}

impl RunReport {
    pub fn mean_reward(&self) -> f64 {
        if self.episodes.is_empty() {
            return 0.0;
        }
        self.episodes.iter().map(|e| e.total_reward).sum::<f64>() / self.episodes.len() as f64
    }

    pub fn reason_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for episode in &self.episodes {
            *counts.entry(episode.reason.as_str()).or_insert(0) += 1;
        }
        counts
    }

    pub fn merge(&mut self, other: RunReport) {
        self.steps += other.steps;
        self.episodes.extend(other.episodes);
    }

    pub fn print_summary(&self) {
        println!("=== 実行結果 ===");
        println!("エピソード数: {}", self.episodes.len());
        println!("総ステップ数: {}", self.steps);
        println!("平均報酬: {:.3}", self.mean_reward());
        println!(
            "防衛成功: {}/{}",
            self.episodes.iter().filter(|e| e.defended).count(),
            self.episodes.len()
        );
        println!("総捕獲数: {}", self.episodes.iter().map(|e| e.captures).sum::<u32>());
        println!("終了要因:");
        for (reason, count) in self.reason_counts() {
            println!("  {}: {}", reason, count);
        }
    }
}

/// 網を最寄りの脅威の接近線に直交させて張るスクリプト方策
#[derive(Debug, Clone)]
pub struct HeuristicPolicy {
    config: Arc<ScenarioConfig>,
}

impl HeuristicPolicy {
    /// 脅威の手前に網中心を置く距離の上限（m）
    const MAX_LEAD_M: f64 = 150.0;

    pub fn new(config: Arc<ScenarioConfig>) -> Self {
        Self { config }
    }

    pub fn decide(
        &self,
        agents: [Option<KinematicSnapshot>; 2],
        adversaries: &[KinematicSnapshot],
        flagship: Vec2,
    ) -> [ActionCommand; 2] {
        let [Some(first), Some(second)] = agents else {
            return [ActionCommand::IDLE; 2];
        };
        let Some(threat) = adversaries
            .iter()
            .min_by(|a, b| a.position.distance(&flagship).total_cmp(&b.position.distance(&flagship)))
        else {
            return [ActionCommand::IDLE; 2];
        };

        let to_flagship = flagship - threat.position;
        let approach = to_flagship.normalize();
        let lead = (to_flagship.magnitude() * 0.5).min(Self::MAX_LEAD_M);
        let center = threat.position + approach * lead;
        let across = Vec2::new(approach.y, -approach.x);
        let half = self.config.reward.cooperative.ideal_separation_m * 0.5;
        let left = center - across * half;
        let right = center + across * half;

        // 交差しない割り当てを選ぶ
        let straight = first.position.distance(&left) + second.position.distance(&right);
        let swapped = first.position.distance(&right) + second.position.distance(&left);
        let (first_goal, second_goal) = if straight <= swapped { (left, right) } else { (right, left) };

        [steer(&first, first_goal), steer(&second, second_goal)]
    }
}

fn steer(own: &KinematicSnapshot, goal: Vec2) -> ActionCommand {
    let delta = goal - own.position;
    let distance = delta.magnitude();
    if distance < 1.0 {
        return ActionCommand::IDLE;
    }
    let bearing = math_utils::wrap_heading(math_utils::rad_to_deg(delta.x.atan2(delta.y)));
    let error = math_utils::angle_difference(own.heading_deg, bearing);
    let thrust = if error.abs() > 90.0 { 0.3 } else { (distance / 50.0).clamp(0.2, 1.0) };
    ActionCommand::new(thrust, error / 45.0)
}

/// 捕獲訓練環境の実行エンジン
pub struct SimulationEngine {
    pub config: Arc<ScenarioConfig>,
    pub world: KinematicWorld,
    pub dt: f64,
    pub step_count: u64,
    pub verbose_level: u8,
    orchestrator: Option<EpisodeOrchestrator>,
    policy: HeuristicPolicy,
}

impl SimulationEngine {
    pub fn new(scenario: ScenarioConfig, verbose_level: u8) -> Self {
        let config = Arc::new(scenario);
        Self {
            world: KinematicWorld::new(config.clone()),
            dt: config.sim.dt_s,
            step_count: 0,
            verbose_level,
            orchestrator: None,
            policy: HeuristicPolicy::new(config.clone()),
            config,
        }
    }

    /// ワールドと各コンポーネントを構築し、最初のリセットを開始する
    pub fn initialize(&mut self) -> Result<(), SimError> {
        if self.verbose_level > 0 {
            info!("シミュレーションエンジンを初期化中...");
        }
        self.config.validate()?;

        let flagship_cfg = &self.config.flagship;
        let flagship_id = self.world.spawn_flagship(flagship_cfg.position, flagship_cfg.collision_radius_m);
        let flagship = FlagshipUnit::new(flagship_id, flagship_cfg.position, flagship_cfg.collision_radius_m);

        let agents = self.initialize_agents()?;
        let registry = self.initialize_adversaries();

        if self.verbose_level > 0 {
            info!("初期化完了:");
            info!("  母艦: {}", flagship_id);
            info!("  味方艇: {}", agents.iter().map(|a| a.name.as_str()).collect::<Vec<_>>().join(", "));
            info!("  敵艇: {}隻", registry.len());
        }

        let mut orchestrator = EpisodeOrchestrator::new(self.config.clone(), agents, registry, flagship);
        orchestrator.begin_episode();
        self.orchestrator = Some(orchestrator);
        Ok(())
    }

    fn initialize_agents(&mut self) -> Result<AgentPair, SimError> {
        let mut agents = Vec::with_capacity(2);
        for agent_cfg in &self.config.agents {
            let id = self.world.spawn_agent(agent_cfg.position, agent_cfg.heading_deg, agent_cfg.radius_m);
            if self.verbose_level > 1 {
                debug!("味方艇初期化: {} ({})", agent_cfg.name, id);
            }
            agents.push(DefenseAgent::new(agent_cfg.name.clone(), id, agent_cfg.placement()));
        }

        let [first, second]: [DefenseAgent; 2] = agents
            .try_into()
            .map_err(|rest: Vec<DefenseAgent>| SimError::AgentSetup(format!("味方艇は2隻必要です ({}隻)", rest.len())))?;
        Ok(AgentPair::new(first, second))
    }

    fn initialize_adversaries(&mut self) -> EntityRegistry {
        let mut registry = EntityRegistry::new(self.config.clone());
        for adversary_cfg in &self.config.adversaries {
            let placement = adversary_cfg.placement();
            let template = adversary_cfg.template();
            let handle = self.world.instantiate(&template, placement.position, placement.heading_deg);
            self.world.reset_path(handle, placement.path.as_ref());
            registry.register(&adversary_cfg.name, template, placement, Some(handle));

            if self.verbose_level > 1 {
                debug!("敵艇初期化: {} ({})", adversary_cfg.name, handle);
            }
        }
        registry
    }

    pub fn orchestrator(&self) -> Option<&EpisodeOrchestrator> {
        self.orchestrator.as_ref()
    }

    /// 1ステップ進める
    pub fn step(&mut self, actions: [ActionCommand; 2]) -> Result<StepResult, SimError> {
        let orchestrator = self.orchestrator.as_mut().ok_or(SimError::NotInitialized)?;

        if orchestrator.phase() == EpisodePhase::Active {
            for (entity, action) in orchestrator.agents().entities().into_iter().zip(actions) {
                self.world.apply_command(entity, action);
            }
            self.world.advance(self.dt);
        }

        let outcome = orchestrator.step(&mut self.world, self.dt);
        self.step_count += 1;

        if self.verbose_level > 2 {
            trace!("ステップ {}: 報酬 {:.5}", self.step_count, outcome.reward);
        }

        let observations = observe(orchestrator, &self.world);
        let agents = observations.map(|(name, observation)| AgentStep {
            name,
            observation,
            reward: outcome.reward,
            done: outcome.done,
        });

        Ok(StepResult {
            step: self.step_count,
            episode: orchestrator.episode_index(),
            tick: orchestrator.tick_count(),
            agents,
            termination_reason: outcome.reason,
        })
    }

    /// スクリプト方策で設定エピソード数を実行
    pub fn run(&mut self) -> Result<RunReport, SimError> {
        let episodes = self.config.sim.episodes as usize;
        let max_steps = self.config.sim.max_steps;
        info!("=== シミュレーション実行開始 ({}エピソード) ===", episodes);

        let mut completed = 0;
        while completed < episodes && self.step_count < max_steps {
            let actions = self.scripted_actions()?;
            let result = self.step(actions)?;

            if let Some(reason) = result.termination_reason {
                completed += 1;
                if self.verbose_level > 0 {
                    info!("進行状況: {}/{} エピソード (直近: {})", completed, episodes, reason);
                }
            }
        }

        let summaries = self
            .orchestrator
            .as_ref()
            .map(|o| o.summaries().to_vec())
            .unwrap_or_default();

        info!("=== シミュレーション完了 ===");
        info!("総ステップ数: {}", self.step_count);

        Ok(RunReport { seed: self.config.sim.seed, steps: self.step_count, episodes: summaries })
    }

    fn scripted_actions(&self) -> Result<[ActionCommand; 2], SimError> {
        let orchestrator = self.orchestrator.as_ref().ok_or(SimError::NotInitialized)?;
        let agents = orchestrator.agents().snapshots(&self.world);
        let adversaries: Vec<KinematicSnapshot> =
            orchestrator.sightings(&self.world).iter().map(|s| s.snapshot).collect();
        Ok(self.policy.decide(agents, &adversaries, orchestrator.flagship().position))
    }
}

fn observe(orchestrator: &EpisodeOrchestrator, world: &KinematicWorld) -> [(String, Observation); 2] {
    let snapshots = orchestrator.agents().snapshots(world);
    let adversaries: Vec<KinematicSnapshot> = orchestrator.sightings(world).iter().map(|s| s.snapshot).collect();
    let flagship = orchestrator.flagship().position;
    let max_adversaries = orchestrator.config().observation.max_adversaries;

    let names = orchestrator.agents().iter().map(|a| a.name.clone()).collect::<Vec<_>>();
    [0usize, 1].map(|index| {
        let own = snapshots[index].as_ref();
        let partner = snapshots[1 - index].as_ref();
        let name = names.get(index).cloned().unwrap_or_default();
        (name, Observation::build(own, partner, &adversaries, flagship, max_adversaries))
    })
}
