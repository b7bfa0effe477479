use crate::models::common::{EntityId, KinematicSnapshot, Vec2};
use crate::scenario::BarrierConfig;

/// 捕獲バリア（ネット）
///
/// 2隻の味方艇の位置から毎ティック導出される非物理ゾーンです。
/// 中心は両艇の中点、向きは艇間軸、長さは艇間距離を設定範囲に切り詰めた値。
/// 艇間距離が範囲外のときは非アクティブで、接触は一切ルーティングされません。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureBarrier {
    pub midpoint: Vec2,
    /// 艇1から艇2へ向かう単位ベクトル
    pub axis: Vec2,
    /// 実際の艇間距離
    pub separation: f64,
    /// 切り詰め後の長さ
    pub length: f64,
    pub half_thickness: f64,
    pub active: bool,
}

impl CaptureBarrier {
    /// 2隻のスナップショットからバリアを射影
    pub fn project(first: &KinematicSnapshot, second: &KinematicSnapshot, config: &BarrierConfig) -> Self {
        let delta = second.position - first.position;
        let separation = delta.magnitude();
        let active = separation >= config.min_length_m && separation <= config.max_length_m;
        Self {
            midpoint: first.position.midpoint(&second.position),
            axis: delta.normalize(),
            separation,
            length: separation.clamp(config.min_length_m, config.max_length_m),
            half_thickness: config.thickness_m * 0.5,
            active,
        }
    }

    /// バリア両端の座標
    pub fn endpoints(&self) -> (Vec2, Vec2) {
        let half = self.axis * (self.length * 0.5);
        (self.midpoint - half, self.midpoint + half)
    }

    /// 点から線分としてのバリアまでの最短距離
    pub fn distance_to(&self, point: Vec2) -> f64 {
        let (start, end) = self.endpoints();
        let segment = end - start;
        let len_sq = segment.dot(&segment);
        if len_sq <= f64::EPSILON {
            return point.distance(&self.midpoint);
        }
        let t = ((point - start).dot(&segment) / len_sq).clamp(0.0, 1.0);
        point.distance(&(start + segment * t))
    }

    /// 半径 `radius` の円がバリアと重なるか（非アクティブ時は常に偽）
    pub fn intersects(&self, point: Vec2, radius: f64) -> bool {
        self.active && self.distance_to(point) <= self.half_thickness + radius
    }
}

/// 守るべき母艦（旗艦）
///
/// 生成は環境構築時に1回だけで、破棄されません。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlagshipUnit {
    pub entity: EntityId,
    pub position: Vec2,
    pub collision_radius_m: f64,
}

impl FlagshipUnit {
    pub fn new(entity: EntityId, position: Vec2, collision_radius_m: f64) -> Self {
        Self { entity, position, collision_radius_m }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BarrierConfig {
        BarrierConfig { min_length_m: 10.0, max_length_m: 60.0, thickness_m: 1.0 }
    }

    fn snap(x: f64, y: f64) -> KinematicSnapshot {
        KinematicSnapshot::new(Vec2::new(x, y), 0.0, 0.0)
    }

    #[test]
    fn test_projection_midpoint_and_axis() {
        let barrier = CaptureBarrier::project(&snap(-20.0, 100.0), &snap(20.0, 100.0), &config());
        assert!(barrier.active);
        assert_eq!(barrier.midpoint, Vec2::new(0.0, 100.0));
        assert!((barrier.axis.x - 1.0).abs() < 1e-12);
        assert!((barrier.length - 40.0).abs() < 1e-12);
    }

    #[test]
    fn test_out_of_range_separation_deactivates() {
        let too_far = CaptureBarrier::project(&snap(0.0, 0.0), &snap(80.0, 0.0), &config());
        assert!(!too_far.active);
        assert!((too_far.length - 60.0).abs() < 1e-12);
        assert!(!too_far.intersects(Vec2::new(40.0, 0.0), 5.0));

        let too_close = CaptureBarrier::project(&snap(0.0, 0.0), &snap(4.0, 0.0), &config());
        assert!(!too_close.active);
    }

    #[test]
    fn test_intersection_uses_segment_distance() {
        let barrier = CaptureBarrier::project(&snap(-20.0, 0.0), &snap(20.0, 0.0), &config());
        assert!(barrier.intersects(Vec2::new(5.0, 2.0), 2.0));
        assert!(!barrier.intersects(Vec2::new(5.0, 4.0), 2.0));
        // 端点より外側は端点からの距離で判定
        assert!((barrier.distance_to(Vec2::new(23.0, 4.0)) - 5.0).abs() < 1e-9);
    }
}
