use std::fmt;
use std::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};

/// 水平面上の2次元ベクトル（位置・速度の両方に使用）
///
/// 艦艇は海面上を移動するため、高度成分は持ちません。
/// `x` は東向き、`y` は北向きの座標軸です（メートル）。
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// 方位角（度、北=0・時計回り）から単位ベクトルを作成
    pub fn from_heading(heading_deg: f64) -> Self {
        let rad = math_utils::deg_to_rad(heading_deg);
        Self::new(rad.sin(), rad.cos())
    }

    /// ベクトルの長さ
    pub fn magnitude(&self) -> f64 {
        (self.x.powi(2) + self.y.powi(2)).sqrt()
    }

    /// 2点間の距離
    pub fn distance(&self, other: &Vec2) -> f64 {
        (*self - *other).magnitude()
    }

    pub fn dot(&self, other: &Vec2) -> f64 {
        self.x * other.x + self.y * other.y
    }

    /// 正規化（長さ0の場合はそのまま返す）
    pub fn normalize(&self) -> Self {
        let mag = self.magnitude();
        if mag > 0.0 {
            Self::new(self.x / mag, self.y / mag)
        } else {
            *self
        }
    }

    /// 2ベクトルのなす角（度、0〜180）
    ///
    /// どちらかの長さが0の場合は0を返します。
    pub fn angle_between_deg(&self, other: &Vec2) -> f64 {
        let denom = self.magnitude() * other.magnitude();
        if denom <= f64::EPSILON {
            return 0.0;
        }
        let cos = (self.dot(other) / denom).clamp(-1.0, 1.0);
        math_utils::rad_to_deg(cos.acos())
    }

    /// 中点
    pub fn midpoint(&self, other: &Vec2) -> Self {
        Self::new((self.x + other.x) * 0.5, (self.y + other.y) * 0.5)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// 設定ミス等で原点に潰れた（または非有限の）座標かどうか
    pub fn is_degenerate(&self) -> bool {
        !self.is_finite() || (self.x.abs() < 1e-6 && self.y.abs() < 1e-6)
    }
}

impl Add for Vec2 {
    type Output = Self;

    fn add(self, other: Self) -> Self::Output {
        Self::new(self.x + other.x, self.y + other.y)
    }
}

impl Sub for Vec2 {
    type Output = Self;

    fn sub(self, other: Self) -> Self::Output {
        Self::new(self.x - other.x, self.y - other.y)
    }
}

impl Mul<f64> for Vec2 {
    type Output = Self;

    fn mul(self, scalar: f64) -> Self::Output {
        Self::new(self.x * scalar, self.y * scalar)
    }
}

/// 物理側エンティティのハンドル
///
/// 物理コラボレータが `instantiate` 時に発行する値で、破棄・再生成のたびに変わります。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl EntityId {
    /// 捕獲バリア（ネット）を表す予約ID。物理側には実体がありません。
    pub const BARRIER: EntityId = EntityId(u64::MAX);
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::BARRIER {
            write!(f, "#barrier")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

/// 敵艇の安定識別子
///
/// 登録時にレジストリが発行し、破棄・再生成をまたいで変わりません。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AdversaryKey(pub u32);

impl fmt::Display for AdversaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A{:03}", self.0)
    }
}

/// 物理コラボレータから読み取った姿勢
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec2,
    /// 方位角（度、北=0・時計回り）
    pub heading_deg: f64,
    pub velocity: Vec2,
}

impl Pose {
    pub fn new(position: Vec2, heading_deg: f64, velocity: Vec2) -> Self {
        Self { position, heading_deg, velocity }
    }
}

/// 判断ティックごとに1回だけ取得する運動状態スナップショット
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KinematicSnapshot {
    pub position: Vec2,
    pub heading_deg: f64,
    /// 線速度の大きさ（m/s）
    pub speed: f64,
}

impl KinematicSnapshot {
    pub fn new(position: Vec2, heading_deg: f64, speed: f64) -> Self {
        Self { position, heading_deg, speed }
    }
}

impl From<Pose> for KinematicSnapshot {
    fn from(pose: Pose) -> Self {
        Self::new(pose.position, pose.heading_deg, pose.velocity.magnitude())
    }
}

/// 数学ユーティリティ関数
pub mod math_utils {
    /// 度をラジアンに変換
    pub fn deg_to_rad(degrees: f64) -> f64 {
        degrees * std::f64::consts::PI / 180.0
    }

    /// ラジアンを度に変換
    pub fn rad_to_deg(radians: f64) -> f64 {
        radians * 180.0 / std::f64::consts::PI
    }

    /// 角度を-180度〜180度の範囲に正規化
    pub fn normalize_angle(angle_deg: f64) -> f64 {
        let mut normalized = angle_deg % 360.0;
        if normalized > 180.0 {
            normalized -= 360.0;
        } else if normalized <= -180.0 {
            normalized += 360.0;
        }
        normalized
    }

    /// 2つの角度の差を計算（-180度〜180度の範囲）
    pub fn angle_difference(angle1_deg: f64, angle2_deg: f64) -> f64 {
        normalize_angle(angle2_deg - angle1_deg)
    }

    /// 方位角を0〜360度に正規化
    pub fn wrap_heading(heading_deg: f64) -> f64 {
        let wrapped = heading_deg.rem_euclid(360.0);
        if wrapped >= 360.0 { 0.0 } else { wrapped }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_angle_difference_wraps() {
        assert!((math_utils::angle_difference(350.0, 10.0) - 20.0).abs() < 1e-9);
        assert!((math_utils::angle_difference(10.0, 350.0) + 20.0).abs() < 1e-9);
        assert!((math_utils::wrap_heading(-90.0) - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_heading_vector_is_north_zero_clockwise() {
        let north = Vec2::from_heading(0.0);
        let east = Vec2::from_heading(90.0);
        assert!((north.y - 1.0).abs() < 1e-9 && north.x.abs() < 1e-9);
        assert!((east.x - 1.0).abs() < 1e-9 && east.y.abs() < 1e-9);
    }

    #[test]
    fn test_angle_between_perpendicular() {
        let a = Vec2::new(1.0, 0.0);
        let b = Vec2::new(0.0, -3.0);
        assert!((a.angle_between_deg(&b) - 90.0).abs() < 1e-9);
        assert_eq!(a.angle_between_deg(&Vec2::ZERO), 0.0);
    }

    #[test]
    fn test_degenerate_detection() {
        assert!(Vec2::ZERO.is_degenerate());
        assert!(Vec2::new(f64::NAN, 3.0).is_degenerate());
        assert!(!Vec2::new(0.0, 1500.0).is_degenerate());
    }
}
