use tracing::warn;

use crate::models::{
    adversary::Placement,
    common::{EntityId, KinematicSnapshot},
    traits::WorldPhysics,
};

/// 味方艇1隻への操舵指令
///
/// `thrust` は正規化前進推力、`turn` は正規化旋回率（どちらも -1〜1）。
/// 非有限値は0に置き換え、範囲外は切り詰めます。ワールドへ渡る指令は
/// 必ずこのコンストラクタを通るため、検証はここ1か所だけで行います。
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ActionCommand {
    thrust: f64,
    turn: f64,
}

impl ActionCommand {
    pub const IDLE: ActionCommand = ActionCommand { thrust: 0.0, turn: 0.0 };

    pub fn new(thrust: f64, turn: f64) -> Self {
        Self {
            thrust: sanitize_axis("thrust", thrust),
            turn: sanitize_axis("turn", turn),
        }
    }

    /// トレーナーから届く連続値2要素の行動ベクトルから作成
    pub fn from_slice(values: &[f32]) -> Self {
        let thrust = values.first().copied().unwrap_or(0.0) as f64;
        let turn = values.get(1).copied().unwrap_or(0.0) as f64;
        Self::new(thrust, turn)
    }

    pub fn thrust(&self) -> f64 {
        self.thrust
    }

    pub fn turn(&self) -> f64 {
        self.turn
    }
}

fn sanitize_axis(axis: &str, value: f64) -> f64 {
    if !value.is_finite() {
        warn!("非有限の{}指令を0に置換: {}", axis, value);
        return 0.0;
    }
    value.clamp(-1.0, 1.0)
}

/// 協調して網を張る味方防御艇
#[derive(Debug, Clone)]
pub struct DefenseAgent {
    pub name: String,
    pub entity: EntityId,
    /// 相方の物理ハンドル（ペア構築時に相互設定）
    pub partner: EntityId,
    /// リセット時に戻る初期姿勢
    pub start: Placement,
    /// 現エピソードの累積報酬（診断用）
    pub cumulative_reward: f64,
    /// 直近ティックの報酬
    pub last_step_reward: f64,
    pub episode_concluded: bool,
}

impl DefenseAgent {
    pub fn new(name: impl Into<String>, entity: EntityId, start: Placement) -> Self {
        Self {
            name: name.into(),
            entity,
            partner: entity,
            start,
            cumulative_reward: 0.0,
            last_step_reward: 0.0,
            episode_concluded: false,
        }
    }
}

/// ちょうど2隻の味方艇
///
/// 相方参照は常に相互で、片方だけのペアは構築できません。
#[derive(Debug, Clone)]
pub struct AgentPair {
    agents: [DefenseAgent; 2],
}

impl AgentPair {
    pub fn new(mut first: DefenseAgent, mut second: DefenseAgent) -> Self {
        first.partner = second.entity;
        second.partner = first.entity;
        Self { agents: [first, second] }
    }

    pub fn get(&self, index: usize) -> Option<&DefenseAgent> {
        self.agents.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DefenseAgent> {
        self.agents.iter()
    }

    pub fn entities(&self) -> [EntityId; 2] {
        [self.agents[0].entity, self.agents[1].entity]
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.agents.iter().any(|a| a.entity == entity)
    }

    pub fn partner_of(&self, entity: EntityId) -> Option<&DefenseAgent> {
        let agent = self.agents.iter().find(|a| a.entity == entity)?;
        self.agents.iter().find(|a| a.entity == agent.partner)
    }

    /// 両艇のスナップショット（取得できない艇は None）
    pub fn snapshots(&self, world: &dyn WorldPhysics) -> [Option<KinematicSnapshot>; 2] {
        [
            world.get_pose(self.agents[0].entity).map(KinematicSnapshot::from),
            world.get_pose(self.agents[1].entity).map(KinematicSnapshot::from),
        ]
    }

    /// グループ報酬を両艇に同額加算
    pub fn add_group_reward(&mut self, amount: f64) {
        for agent in &mut self.agents {
            agent.cumulative_reward += amount;
            agent.last_step_reward += amount;
        }
    }

    /// ティック開始時に直近報酬をクリア
    pub fn begin_step(&mut self) {
        for agent in &mut self.agents {
            agent.last_step_reward = 0.0;
        }
    }

    pub fn begin_episode(&mut self) {
        for agent in &mut self.agents {
            agent.cumulative_reward = 0.0;
            agent.last_step_reward = 0.0;
            agent.episode_concluded = false;
        }
    }

    pub fn conclude_episode(&mut self) {
        for agent in &mut self.agents {
            agent.episode_concluded = true;
        }
    }

    /// 初期姿勢へ戻して停止させる（破棄はしない）
    pub fn reposition(&self, world: &mut dyn WorldPhysics) {
        for agent in &self.agents {
            if !world.contains(agent.entity) {
                warn!("味方艇 {} ({}) がワールドに存在しません", agent.name, agent.entity);
                continue;
            }
            world.set_pose(agent.entity, agent.start.position, agent.start.heading_deg);
            world.zero_velocity(agent.entity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::common::Vec2;

    fn pair() -> AgentPair {
        AgentPair::new(
            DefenseAgent::new("defender-1", EntityId(1), Placement::new(Vec2::new(-25.0, 0.0), 0.0, None)),
            DefenseAgent::new("defender-2", EntityId(2), Placement::new(Vec2::new(25.0, 0.0), 0.0, None)),
        )
    }

    #[test]
    fn test_action_command_scrubs_non_finite() {
        let cmd = ActionCommand::new(f64::NAN, f64::INFINITY);
        assert_eq!(cmd, ActionCommand::IDLE);

        let clamped = ActionCommand::new(3.0, -7.5);
        assert_eq!(clamped.thrust(), 1.0);
        assert_eq!(clamped.turn(), -1.0);

        let short = ActionCommand::from_slice(&[0.5]);
        assert_eq!(short.thrust(), 0.5);
        assert_eq!(short.turn(), 0.0);
    }

    #[test]
    fn test_partner_reference_is_mutual() {
        let pair = pair();
        assert_eq!(pair.partner_of(EntityId(1)).map(|a| a.entity), Some(EntityId(2)));
        assert_eq!(pair.partner_of(EntityId(2)).map(|a| a.entity), Some(EntityId(1)));
        assert!(pair.partner_of(EntityId(9)).is_none());
    }

    #[test]
    fn test_group_reward_reaches_both_agents() {
        let mut pair = pair();
        pair.add_group_reward(0.25);
        pair.add_group_reward(-0.05);
        for agent in pair.iter() {
            assert!((agent.cumulative_reward - 0.2).abs() < 1e-12);
        }
        pair.begin_episode();
        assert!(pair.iter().all(|a| a.cumulative_reward == 0.0 && !a.episode_concluded));
    }
}
