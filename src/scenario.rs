//! # Scenario モジュール
//!
//! 捕獲訓練環境の設定をYAMLシナリオファイルから読み込みます。
//!
//! すべてのセクションに既定値があり、部分的なファイルでも読み込めます。
//! `ScenarioConfig::default()` 自体がそのまま実行可能なシナリオです。
//! 読み込んだ設定は環境ごとに1回だけ構築され、`Arc` で各コンポーネントに共有されます。

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::adversary::{AdversaryTemplate, PathRef, Placement};
use crate::models::common::Vec2;

/// シナリオメタデータ
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScenarioMeta {
    pub version: String,
    pub name: String,
    pub description: String,
}

impl Default for ScenarioMeta {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            name: "flagship-defense".to_string(),
            description: "2隻の防御艇が網で侵入艇を捕獲し母艦を守る".to_string(),
        }
    }
}

/// シミュレーション設定
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub dt_s: f64,
    pub seed: u64,
    /// 実行するエピソード数
    pub episodes: u32,
    /// 暴走防止のための総ステップ上限
    pub max_steps: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self { dt_s: 0.1, seed: 42, episodes: 5, max_steps: 200_000 }
    }
}

/// エピソード境界の設定
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EpisodeConfig {
    pub max_ticks: u64,
    /// これを超えて味方艇が離れると FormationBroken で終了
    pub max_ally_separation_m: f64,
    pub formation_broken_penalty: f64,
    /// 再配置後に物理側を落ち着かせるティック数
    pub settle_ticks: u32,
    /// 同一発生源の接触を抑制する時間窓（シミュレーション秒）
    pub collision_cooldown_s: f64,
    /// 敵艇が全滅したら成功終了とするか
    pub end_on_all_destroyed: bool,
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        Self {
            max_ticks: 5000,
            max_ally_separation_m: 150.0,
            formation_broken_penalty: -0.5,
            settle_ticks: 2,
            collision_cooldown_s: 2.0,
            end_on_all_destroyed: true,
        }
    }
}

/// 母艦周囲の同心リング
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RingConfig {
    pub outer_radius_m: f64,
    /// 最内リング。ここへの侵入で防衛成功ボーナスが失われる。
    pub inner_radius_m: f64,
    /// 各リングで1回だけ与えるペナルティ
    pub breach_penalty: f64,
    pub defense_success_reward: f64,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            outer_radius_m: 2000.0,
            inner_radius_m: 1000.0,
            breach_penalty: -0.1,
            defense_success_reward: 0.5,
        }
    }
}

impl RingConfig {
    /// 外側から順のリング半径
    pub fn radii(&self) -> [f64; 2] {
        [self.outer_radius_m, self.inner_radius_m]
    }
}

/// 捕獲時の終了方針
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// 1回の捕獲でエピソード終了
    SingleHit,
    /// 捕獲回数が上限に達するまで継続
    Attrition,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub mode: CaptureMode,
    /// attrition モードで終了となる捕獲回数
    pub max_collision_count: u32,
    pub base_reward: f64,
    /// 網中心に近いほど加算される最大ボーナス
    pub center_bonus: f64,
    pub center_bonus_max_distance_m: f64,
    /// 捕獲した敵艇を即座に再生成するか（偽なら次のリセットまで破棄のまま）
    pub respawn_captured: bool,
    pub respawn_jitter_radius_m: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            mode: CaptureMode::SingleHit,
            max_collision_count: 3,
            base_reward: 1.0,
            center_bonus: 0.3,
            center_bonus_max_distance_m: 30.0,
            respawn_captured: true,
            respawn_jitter_radius_m: 0.0,
        }
    }
}

impl CaptureConfig {
    /// 何回目の捕獲でエピソードを終了するか
    pub fn terminal_capture_count(&self) -> u32 {
        match self.mode {
            CaptureMode::SingleHit => 1,
            CaptureMode::Attrition => self.max_collision_count.max(1),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PenaltyConfig {
    pub flagship_collision: f64,
    pub friendly_collision: f64,
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        Self { flagship_collision: -1.75, friendly_collision: -1.0 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BarrierConfig {
    pub min_length_m: f64,
    pub max_length_m: f64,
    pub thickness_m: f64,
}

impl Default for BarrierConfig {
    fn default() -> Self {
        Self { min_length_m: 5.0, max_length_m: 100.0, thickness_m: 1.0 }
    }
}

/// 協調機動報酬
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CooperativeRewardConfig {
    pub weight: f64,
    pub heading_sync_reward: f64,
    pub heading_tolerance_deg: f64,
    pub speed_sync_reward: f64,
    pub speed_tolerance_mps: f64,
    pub spacing_reward: f64,
    pub ideal_separation_m: f64,
    pub separation_tolerance_m: f64,
    pub net_tension_reward: f64,
    pub net_max_length_m: f64,
    pub net_optimal_min_ratio: f64,
    pub net_optimal_max_ratio: f64,
}

impl Default for CooperativeRewardConfig {
    fn default() -> Self {
        Self {
            weight: 1.0,
            heading_sync_reward: 0.0002,
            heading_tolerance_deg: 15.0,
            speed_sync_reward: 0.0002,
            speed_tolerance_mps: 2.0,
            spacing_reward: 0.0002,
            ideal_separation_m: 50.0,
            separation_tolerance_m: 5.0,
            net_tension_reward: 0.0005,
            net_max_length_m: 50.0,
            net_optimal_min_ratio: 0.90,
            net_optimal_max_ratio: 0.95,
        }
    }
}

/// 戦術機動報酬
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TacticalRewardConfig {
    pub weight: f64,
    pub perpendicular_reward: f64,
    pub perpendicular_tolerance_deg: f64,
    pub tracking_gain_reward: f64,
    /// 追跡利得の基準距離（この距離だけ縮めると tracking_gain_reward 1回分）
    pub tracking_gain_unit_m: f64,
}

impl Default for TacticalRewardConfig {
    fn default() -> Self {
        Self {
            weight: 1.0,
            perpendicular_reward: 0.0005,
            perpendicular_tolerance_deg: 15.0,
            tracking_gain_reward: 0.0002,
            tracking_gain_unit_m: 10.0,
        }
    }
}

/// 安全・制約ペナルティ
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SafetyRewardConfig {
    pub weight: f64,
    pub formation_break_penalty: f64,
    pub max_formation_distance_m: f64,
    pub max_formation_angle_deg: f64,
    pub time_penalty: f64,
}

impl Default for SafetyRewardConfig {
    fn default() -> Self {
        Self {
            weight: 1.0,
            formation_break_penalty: -0.05,
            max_formation_distance_m: 100.0,
            max_formation_angle_deg: 90.0,
            time_penalty: -0.001,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RewardConfig {
    pub cooperative: CooperativeRewardConfig,
    pub tactical: TacticalRewardConfig,
    pub safety: SafetyRewardConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FlagshipConfig {
    pub position: Vec2,
    pub collision_radius_m: f64,
}

impl Default for FlagshipConfig {
    fn default() -> Self {
        Self { position: Vec2::ZERO, collision_radius_m: 60.0 }
    }
}

/// 味方艇の初期配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    pub name: String,
    pub position: Vec2,
    #[serde(default)]
    pub heading_deg: f64,
    #[serde(default = "default_agent_radius")]
    pub radius_m: f64,
}

fn default_agent_radius() -> f64 {
    5.0
}

impl AgentConfig {
    pub fn placement(&self) -> Placement {
        Placement::new(self.position, self.heading_deg, None)
    }
}

/// 敵艇の初期配置とテンプレート
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdversaryConfig {
    pub name: String,
    pub position: Vec2,
    #[serde(default)]
    pub heading_deg: f64,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_adversary_kind")]
    pub kind: String,
    #[serde(default = "default_adversary_speed")]
    pub speed_mps: f64,
    #[serde(default = "default_adversary_radius")]
    pub radius_m: f64,
}

fn default_adversary_kind() -> String {
    "attack_boat".to_string()
}

fn default_adversary_speed() -> f64 {
    12.0
}

fn default_adversary_radius() -> f64 {
    4.0
}

impl AdversaryConfig {
    pub fn placement(&self) -> Placement {
        Placement::new(self.position, self.heading_deg, self.path.clone().map(PathRef))
    }

    pub fn template(&self) -> AdversaryTemplate {
        AdversaryTemplate::new(self.kind.clone(), self.speed_mps, self.radius_m)
    }
}

/// 敵艇が辿る航路
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathConfig {
    pub name: String,
    pub waypoints: Vec<Vec2>,
}

/// 味方艇の運動性能
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VesselConfig {
    pub max_speed_mps: f64,
    pub max_turn_rate_deg_s: f64,
    pub max_accel_mps2: f64,
}

impl Default for VesselConfig {
    fn default() -> Self {
        Self { max_speed_mps: 20.0, max_turn_rate_deg_s: 90.0, max_accel_mps2: 5.0 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservationConfig {
    /// 観測に含める敵艇の最大数（不足分はゼロ埋め）
    pub max_adversaries: usize,
}

impl Default for ObservationConfig {
    fn default() -> Self {
        Self { max_adversaries: 5 }
    }
}

/// 完全なシナリオ設定
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub meta: ScenarioMeta,
    pub sim: SimulationConfig,
    pub episode: EpisodeConfig,
    pub rings: RingConfig,
    pub capture: CaptureConfig,
    pub penalties: PenaltyConfig,
    pub barrier: BarrierConfig,
    pub reward: RewardConfig,
    pub flagship: FlagshipConfig,
    pub agents: Vec<AgentConfig>,
    pub adversaries: Vec<AdversaryConfig>,
    pub paths: Vec<PathConfig>,
    /// 保存済み配置が壊れていた場合の代替配置
    pub default_placement: Placement,
    pub vessel: VesselConfig,
    pub observation: ObservationConfig,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        let agents = vec![
            AgentConfig {
                name: "defender-1".to_string(),
                position: Vec2::new(-25.0, 2500.0),
                heading_deg: 0.0,
                radius_m: default_agent_radius(),
            },
            AgentConfig {
                name: "defender-2".to_string(),
                position: Vec2::new(25.0, 2500.0),
                heading_deg: 0.0,
                radius_m: default_agent_radius(),
            },
        ];
        let adversaries = [(-600.0, 4000.0), (0.0, 4500.0), (600.0, 4000.0)]
            .iter()
            .enumerate()
            .map(|(index, &(x, y))| AdversaryConfig {
                name: format!("raider-{}", index + 1),
                position: Vec2::new(x, y),
                heading_deg: 180.0,
                path: None,
                kind: default_adversary_kind(),
                speed_mps: default_adversary_speed(),
                radius_m: default_adversary_radius(),
            })
            .collect();

        Self {
            meta: ScenarioMeta::default(),
            sim: SimulationConfig::default(),
            episode: EpisodeConfig::default(),
            rings: RingConfig::default(),
            capture: CaptureConfig::default(),
            penalties: PenaltyConfig::default(),
            barrier: BarrierConfig::default(),
            reward: RewardConfig::default(),
            flagship: FlagshipConfig::default(),
            agents,
            adversaries,
            paths: Vec::new(),
            default_placement: Placement::new(Vec2::new(0.0, 3500.0), 180.0, None),
            vessel: VesselConfig::default(),
            observation: ObservationConfig::default(),
        }
    }
}

impl ScenarioConfig {
    /// YAMLファイルからシナリオ設定を読み込み
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.to_path_buf()));
        }

        let contents = fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config: ScenarioConfig = serde_yaml::from_str(&contents).map_err(|source| ScenarioError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// YAML文字列から読み込み（ファイルを介さない場合）
    pub fn from_yaml_str(contents: &str) -> Result<Self, ScenarioError> {
        let config: ScenarioConfig = serde_yaml::from_str(contents).map_err(|source| ScenarioError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// 設定の基本的な検証
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.sim.dt_s <= 0.0 || !self.sim.dt_s.is_finite() {
            return Err(invalid("sim.dt_s must be positive"));
        }
        if self.episode.max_ticks == 0 {
            return Err(invalid("episode.max_ticks must be positive"));
        }
        if self.episode.collision_cooldown_s < 0.0 {
            return Err(invalid("episode.collision_cooldown_s must not be negative"));
        }

        let rings = &self.rings;
        if rings.inner_radius_m <= 0.0 || rings.outer_radius_m <= rings.inner_radius_m {
            return Err(invalid("rings must satisfy 0 < inner_radius_m < outer_radius_m"));
        }

        if self.capture.mode == CaptureMode::Attrition && self.capture.max_collision_count == 0 {
            return Err(invalid("capture.max_collision_count must be at least 1 in attrition mode"));
        }
        if self.capture.center_bonus_max_distance_m <= 0.0 {
            return Err(invalid("capture.center_bonus_max_distance_m must be positive"));
        }
        if self.capture.respawn_jitter_radius_m < 0.0 {
            return Err(invalid("capture.respawn_jitter_radius_m must not be negative"));
        }

        let barrier = &self.barrier;
        if barrier.min_length_m < 0.0 || barrier.min_length_m >= barrier.max_length_m {
            return Err(invalid("barrier must satisfy 0 <= min_length_m < max_length_m"));
        }

        let coop = &self.reward.cooperative;
        if coop.net_optimal_min_ratio >= coop.net_optimal_max_ratio {
            return Err(invalid("reward.cooperative net optimal ratio band is empty"));
        }
        if self.reward.tactical.perpendicular_tolerance_deg <= 0.0 || self.reward.tactical.tracking_gain_unit_m <= 0.0 {
            return Err(invalid("reward.tactical tolerances must be positive"));
        }

        if self.agents.len() != 2 {
            return Err(invalid(format!("exactly two agents are required, found {}", self.agents.len())));
        }

        let mut names = HashSet::new();
        for adversary in &self.adversaries {
            if !names.insert(adversary.name.as_str()) {
                return Err(invalid(format!("duplicate adversary name {}", adversary.name)));
            }
            if let Some(path) = &adversary.path {
                if !self.paths.iter().any(|p| &p.name == path) {
                    return Err(invalid(format!("adversary {} references unknown path {}", adversary.name, path)));
                }
            }
        }

        if self.default_placement.is_degenerate() {
            return Err(invalid("default_placement must not be degenerate"));
        }

        Ok(())
    }

    /// シナリオの概要を表示
    pub fn print_summary(&self) {
        println!("=== シナリオ情報 ===");
        println!("名前: {}", self.meta.name);
        println!("説明: {}", self.meta.description);
        println!("バージョン: {}", self.meta.version);
        println!();

        println!("=== シミュレーション設定 ===");
        println!("時間刻み: {:.3}秒", self.sim.dt_s);
        println!("エピソード数: {}", self.sim.episodes);
        println!("最大ティック: {}", self.episode.max_ticks);
        println!("シード値: {}", self.sim.seed);
        println!();

        println!("=== 捕獲設定 ===");
        match self.capture.mode {
            CaptureMode::SingleHit => println!("モード: single_hit"),
            CaptureMode::Attrition => {
                println!("モード: attrition (上限 {}回)", self.capture.max_collision_count)
            }
        }
        println!(
            "リング: {:.0}m / {:.0}m (ペナルティ {:.2})",
            self.rings.outer_radius_m, self.rings.inner_radius_m, self.rings.breach_penalty
        );
        println!();

        println!("=== 戦力 ===");
        println!("味方艇: {}隻", self.agents.len());
        println!("敵艇: {}隻", self.adversaries.len());
        for adversary in &self.adversaries {
            println!(
                "  {}: ({:.0}, {:.0}) {:.1}m/s",
                adversary.name, adversary.position.x, adversary.position.y, adversary.speed_mps
            );
        }
    }
}

fn invalid(msg: impl Into<String>) -> ScenarioError {
    ScenarioError::Validation(msg.into())
}

/// シナリオ読み込みエラー
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("シナリオファイルが見つかりません: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("ファイル読み込みエラー {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML解析エラー {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("設定検証エラー: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_scenario_is_valid() {
        let config = ScenarioConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.capture.terminal_capture_count(), 1);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
meta:
  name: attrition-drill
capture:
  mode: attrition
  max_collision_count: 3
episode:
  max_ticks: 800
"#;
        let config = ScenarioConfig::from_yaml_str(yaml).expect("valid scenario");
        assert_eq!(config.meta.name, "attrition-drill");
        assert_eq!(config.capture.mode, CaptureMode::Attrition);
        assert_eq!(config.capture.terminal_capture_count(), 3);
        assert_eq!(config.episode.max_ticks, 800);
        assert_eq!(config.agents.len(), 2);
        assert_eq!(config.rings.inner_radius_m, 1000.0);
    }

    #[test]
    fn test_adversary_entries_parse_with_paths() {
        let yaml = r#"
paths:
  - name: east-run
    waypoints:
      - { x: 800.0, y: 3000.0 }
      - { x: 200.0, y: 1500.0 }
adversaries:
  - name: raider-a
    position: { x: 1000.0, y: 3500.0 }
    heading_deg: 200.0
    path: east-run
"#;
        let config = ScenarioConfig::from_yaml_str(yaml).expect("valid scenario");
        let adversary = &config.adversaries[0];
        assert_eq!(adversary.placement().path, Some(PathRef("east-run".to_string())));
        assert_eq!(adversary.template().kind, "attack_boat");
    }

    #[test]
    fn test_validation_rejects_bad_rings_and_agent_count() {
        let mut config = ScenarioConfig::default();
        config.rings.inner_radius_m = 2500.0;
        assert!(matches!(config.validate(), Err(ScenarioError::Validation(_))));

        let mut config = ScenarioConfig::default();
        config.agents.pop();
        assert!(matches!(config.validate(), Err(ScenarioError::Validation(_))));

        let mut config = ScenarioConfig::default();
        config.adversaries[0].path = Some("missing".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_reports_not_found() {
        let err = ScenarioConfig::from_file("scenarios/does_not_exist.yaml").unwrap_err();
        assert!(matches!(err, ScenarioError::FileNotFound(_)));
    }
}
