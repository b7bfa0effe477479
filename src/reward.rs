//! # Reward モジュール
//!
//! 味方艇2隻の運動状態スナップショットからティックごとの整形報酬を計算します。
//!
//! ## 報酬の構成
//!
//! - **協調**: 方位同期・速度同期・間隔維持・網の張力
//! - **戦術**: 最寄り敵艇の接近線に対する網の直交度、追跡利得
//! - **安全**: 隊形崩れペナルティ、時間ペナルティ
//!
//! すべての関数は副作用を持ちません。追跡利得に必要な前ティックの距離は
//! 呼び出し側（エピソード制御）が保持し、引数として渡します。

use std::sync::Arc;

use crate::models::barrier::CaptureBarrier;
use crate::models::common::{KinematicSnapshot, Vec2, math_utils};
use crate::scenario::{ScenarioConfig, TacticalRewardConfig};

/// 1ティック分の報酬内訳
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TickScore {
    pub cooperative: f64,
    pub tactical: f64,
    pub safety: f64,
    /// 最寄り敵艇から網中心までの距離（次ティックの追跡利得用）
    pub nearest_distance: Option<f64>,
}

impl TickScore {
    /// 重み付け済みの合計
    pub fn total(&self) -> f64 {
        self.cooperative + self.tactical + self.safety
    }
}

/// 協調機動報酬の内訳（テスト・診断用）
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CooperativeBreakdown {
    pub heading_sync: f64,
    pub speed_sync: f64,
    pub spacing: f64,
    pub net_tension: f64,
}

impl CooperativeBreakdown {
    pub fn sum(&self) -> f64 {
        self.heading_sync + self.speed_sync + self.spacing + self.net_tension
    }
}

/// 整形報酬の計算器
#[derive(Debug, Clone)]
pub struct RewardShaper {
    config: Arc<ScenarioConfig>,
}

impl RewardShaper {
    pub fn new(config: Arc<ScenarioConfig>) -> Self {
        Self { config }
    }

    /// ティックごとの報酬をまとめて計算
    ///
    /// `agents` のどちらかが欠けている場合は全項目0を返します。
    pub fn score(
        &self,
        agents: [Option<KinematicSnapshot>; 2],
        barrier: Option<&CaptureBarrier>,
        adversaries: &[KinematicSnapshot],
        previous_nearest: Option<f64>,
    ) -> TickScore {
        let (Some(first), Some(second)) = (agents[0], agents[1]) else {
            return TickScore::default();
        };
        let reward = &self.config.reward;

        let cooperative = self.cooperative(&first, &second).sum() * reward.cooperative.weight;
        let (tactical, nearest_distance) = match barrier {
            Some(barrier) => {
                let (value, nearest) = self.tactical(&first, &second, barrier.midpoint, adversaries, previous_nearest);
                (value * reward.tactical.weight, nearest)
            }
            None => (0.0, None),
        };
        let safety = self.safety(&first, &second) * reward.safety.weight;

        TickScore { cooperative, tactical, safety, nearest_distance }
    }

    /// 協調機動報酬
    pub fn cooperative(&self, first: &KinematicSnapshot, second: &KinematicSnapshot) -> CooperativeBreakdown {
        let cfg = &self.config.reward.cooperative;
        let mut breakdown = CooperativeBreakdown::default();

        let heading_diff = math_utils::angle_difference(first.heading_deg, second.heading_deg).abs();
        if heading_diff <= cfg.heading_tolerance_deg {
            breakdown.heading_sync = cfg.heading_sync_reward;
        }

        if (first.speed - second.speed).abs() <= cfg.speed_tolerance_mps {
            breakdown.speed_sync = cfg.speed_sync_reward;
        }

        let separation = first.position.distance(&second.position);
        if (separation - cfg.ideal_separation_m).abs() <= cfg.separation_tolerance_m {
            breakdown.spacing = cfg.spacing_reward;
        }

        // 最適帯の中心で最大、帯の端で0に線形減衰
        let optimal_min = cfg.net_max_length_m * cfg.net_optimal_min_ratio;
        let optimal_max = cfg.net_max_length_m * cfg.net_optimal_max_ratio;
        if separation >= optimal_min && separation <= optimal_max {
            let center = (optimal_min + optimal_max) * 0.5;
            let max_deviation = (optimal_max - optimal_min) * 0.5;
            if max_deviation > 0.0 {
                let tension = 1.0 - (separation - center).abs() / max_deviation;
                breakdown.net_tension = cfg.net_tension_reward * tension.max(0.0);
            }
        }

        breakdown
    }

    /// 戦術機動報酬。戻り値は（報酬, 最寄り敵艇の網中心距離）。
    pub fn tactical(
        &self,
        first: &KinematicSnapshot,
        second: &KinematicSnapshot,
        net_center: Vec2,
        adversaries: &[KinematicSnapshot],
        previous_nearest: Option<f64>,
    ) -> (f64, Option<f64>) {
        let Some(nearest) = adversaries
            .iter()
            .min_by(|a, b| {
                a.position
                    .distance(&net_center)
                    .partial_cmp(&b.position.distance(&net_center))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
        else {
            return (0.0, None);
        };

        let cfg = &self.config.reward.tactical;
        let net_vector = second.position - first.position;
        let approach = net_center - nearest.position;
        let current = approach.magnitude();

        let mut total = perpendicular_bonus(cfg, &net_vector, &approach);
        total += tracking_gain(cfg, previous_nearest, current);

        (total, Some(current))
    }

    /// 安全・制約ペナルティ
    pub fn safety(&self, first: &KinematicSnapshot, second: &KinematicSnapshot) -> f64 {
        let cfg = &self.config.reward.safety;
        let separation = first.position.distance(&second.position);
        let heading_diff = math_utils::angle_difference(first.heading_deg, second.heading_deg).abs();

        let mut total = cfg.time_penalty;
        if separation > cfg.max_formation_distance_m || heading_diff > cfg.max_formation_angle_deg {
            total += cfg.formation_break_penalty;
        }
        total
    }
}

/// 網の軸が敵艇の接近線に直交しているほど大きい報酬
fn perpendicular_bonus(cfg: &TacticalRewardConfig, net_vector: &Vec2, approach: &Vec2) -> f64 {
    if net_vector.magnitude() <= 0.1 || approach.magnitude() <= 0.1 {
        return 0.0;
    }
    let deviation = (net_vector.angle_between_deg(approach) - 90.0).abs();
    if deviation > cfg.perpendicular_tolerance_deg {
        return 0.0;
    }
    cfg.perpendicular_reward * (1.0 - deviation / cfg.perpendicular_tolerance_deg)
}

/// 距離が縮んだときだけ加点し、離れても減点しない
fn tracking_gain(cfg: &TacticalRewardConfig, previous: Option<f64>, current: f64) -> f64 {
    match previous {
        Some(previous) if current < previous => {
            cfg.tracking_gain_reward * ((previous - current) / cfg.tracking_gain_unit_m)
        }
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shaper() -> RewardShaper {
        RewardShaper::new(Arc::new(ScenarioConfig::default()))
    }

    fn snap(x: f64, y: f64, heading: f64, speed: f64) -> KinematicSnapshot {
        KinematicSnapshot::new(Vec2::new(x, y), heading, speed)
    }

    #[test]
    fn test_net_tension_peaks_at_band_center() {
        let shaper = shaper();
        // 50m × (0.90 + 0.95) / 2 = 46.25m
        let center = shaper.cooperative(&snap(0.0, 0.0, 0.0, 5.0), &snap(46.25, 0.0, 0.0, 5.0));
        assert!((center.net_tension - 0.0005).abs() < 1e-12);

        let off_center = shaper.cooperative(&snap(0.0, 0.0, 0.0, 5.0), &snap(47.0, 0.0, 0.0, 5.0));
        assert!(off_center.net_tension > 0.0 && off_center.net_tension < center.net_tension);

        let outside = shaper.cooperative(&snap(0.0, 0.0, 0.0, 5.0), &snap(40.0, 0.0, 0.0, 5.0));
        assert_eq!(outside.net_tension, 0.0);
    }

    #[test]
    fn test_cooperative_bonuses_respect_tolerances() {
        let shaper = shaper();
        let synced = shaper.cooperative(&snap(0.0, 0.0, 355.0, 10.0), &snap(50.0, 0.0, 5.0, 11.0));
        assert_eq!(synced.heading_sync, 0.0002);
        assert_eq!(synced.speed_sync, 0.0002);
        assert_eq!(synced.spacing, 0.0002);

        let diverged = shaper.cooperative(&snap(0.0, 0.0, 0.0, 2.0), &snap(70.0, 0.0, 40.0, 9.0));
        assert_eq!(diverged.sum(), 0.0);
    }

    #[test]
    fn test_perpendicular_interception_scaled() {
        let shaper = shaper();
        let first = snap(-25.0, 0.0, 0.0, 0.0);
        let second = snap(25.0, 0.0, 0.0, 0.0);
        let head_on = [snap(0.0, 500.0, 180.0, 12.0)];
        let (reward, nearest) = shaper.tactical(&first, &second, Vec2::ZERO, &head_on, None);
        assert!((reward - 0.0005).abs() < 1e-12);
        assert_eq!(nearest, Some(500.0));

        let oblique = [snap(500.0, 100.0, 180.0, 12.0)];
        let (reward, _) = shaper.tactical(&first, &second, Vec2::ZERO, &oblique, None);
        assert_eq!(reward, 0.0);
    }

    #[test]
    fn test_tracking_gain_never_penalizes() {
        let cfg = TacticalRewardConfig::default();
        assert!((tracking_gain(&cfg, Some(120.0), 100.0) - 0.0004).abs() < 1e-12);
        assert_eq!(tracking_gain(&cfg, Some(100.0), 120.0), 0.0);
        assert_eq!(tracking_gain(&cfg, None, 100.0), 0.0);
    }

    #[test]
    fn test_safety_penalties() {
        let shaper = shaper();
        let tight = shaper.safety(&snap(0.0, 0.0, 0.0, 0.0), &snap(50.0, 0.0, 10.0, 0.0));
        assert!((tight - (-0.001)).abs() < 1e-12);

        let broken = shaper.safety(&snap(0.0, 0.0, 0.0, 0.0), &snap(120.0, 0.0, 0.0, 0.0));
        assert!((broken - (-0.051)).abs() < 1e-12);

        let crossed = shaper.safety(&snap(0.0, 0.0, 0.0, 0.0), &snap(50.0, 0.0, 135.0, 0.0));
        assert!((crossed - (-0.051)).abs() < 1e-12);
    }

    #[test]
    fn test_missing_agent_scores_zero() {
        let shaper = shaper();
        let score = shaper.score([Some(snap(0.0, 0.0, 0.0, 0.0)), None], None, &[], Some(10.0));
        assert_eq!(score, TickScore::default());
        assert_eq!(score.total(), 0.0);
    }
}
