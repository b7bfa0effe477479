use serde::Serialize;

use crate::models::common::{KinematicSnapshot, Vec2, math_utils};

/// 自艇・相方・母艦の成分数
const SELF_LEN: usize = 4;
const PARTNER_LEN: usize = 4;
const ADVERSARY_LEN: usize = 4;
const FLAGSHIP_LEN: usize = 3;

const POSITION_SCALE: f64 = 100.0;
const SPEED_SCALE: f64 = 20.0;
const FLAGSHIP_SCALE: f64 = 1000.0;

/// 味方艇1隻分の固定長観測ベクトル
///
/// 並び: 自艇4 / 相方4 / 敵艇 4×N（距離の近い順、不足分はゼロ埋め）/ 母艦3
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub values: Vec<f32>,
}

impl Observation {
    /// 観測長 = 11 + 4N
    pub fn len_for(max_adversaries: usize) -> usize {
        SELF_LEN + PARTNER_LEN + ADVERSARY_LEN * max_adversaries + FLAGSHIP_LEN
    }

    /// 観測を組み立てる
    ///
    /// 自艇のスナップショットが無い場合は全要素0の観測を返します。
    pub fn build(
        own: Option<&KinematicSnapshot>,
        partner: Option<&KinematicSnapshot>,
        adversaries: &[KinematicSnapshot],
        flagship: Vec2,
        max_adversaries: usize,
    ) -> Self {
        let len = Self::len_for(max_adversaries);
        let Some(own) = own else {
            return Self { values: vec![0.0; len] };
        };
        let mut values = Vec::with_capacity(len);

        values.extend([
            own.position.x / POSITION_SCALE,
            own.position.y / POSITION_SCALE,
            math_utils::wrap_heading(own.heading_deg) / 360.0,
            own.speed / SPEED_SCALE,
        ]);

        match partner {
            Some(partner) => values.extend(relative(own, partner)),
            None => values.extend([0.0; PARTNER_LEN]),
        }

        let mut nearest: Vec<&KinematicSnapshot> = adversaries.iter().collect();
        nearest.sort_by(|a, b| {
            a.position
                .distance(&own.position)
                .total_cmp(&b.position.distance(&own.position))
        });
        for slot in 0..max_adversaries {
            match nearest.get(slot) {
                Some(adversary) => values.extend(relative(own, adversary)),
                None => values.extend([0.0; ADVERSARY_LEN]),
            }
        }

        let (right, forward) = local_offset(own, flagship);
        values.extend([
            right / FLAGSHIP_SCALE,
            forward / FLAGSHIP_SCALE,
            own.position.distance(&flagship) / FLAGSHIP_SCALE,
        ]);

        Self { values: values.into_iter().map(|v| v as f32).collect() }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// 自艇基準の（右方向, 前方向）オフセット
fn local_offset(own: &KinematicSnapshot, point: Vec2) -> (f64, f64) {
    let delta = point - own.position;
    let forward = Vec2::from_heading(own.heading_deg);
    let right = Vec2::from_heading(own.heading_deg + 90.0);
    (delta.dot(&right), delta.dot(&forward))
}

fn relative(own: &KinematicSnapshot, other: &KinematicSnapshot) -> [f64; 4] {
    let (right, forward) = local_offset(own, other.position);
    [
        right / POSITION_SCALE,
        forward / POSITION_SCALE,
        math_utils::angle_difference(own.heading_deg, other.heading_deg) / 180.0,
        other.speed / SPEED_SCALE,
    ]
}
