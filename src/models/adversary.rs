use serde::{Deserialize, Serialize};

use crate::models::common::{AdversaryKey, EntityId, Vec2};

/// 航路の参照名
///
/// 実際のウェイポイント列は物理コラボレータ側が保持し、ここでは名前だけを持ちます。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathRef(pub String);

/// 配置（位置・方位・航路）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub position: Vec2,
    #[serde(default)]
    pub heading_deg: f64,
    #[serde(default)]
    pub path: Option<PathRef>,
}

impl Placement {
    pub fn new(position: Vec2, heading_deg: f64, path: Option<PathRef>) -> Self {
        Self { position, heading_deg, path }
    }

    /// 位置が原点に潰れている、または値が非有限の場合に真
    pub fn is_degenerate(&self) -> bool {
        self.position.is_degenerate() || !self.heading_deg.is_finite()
    }
}

/// 敵艇のテンプレート（再生成用スナップショット）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdversaryTemplate {
    /// テンプレート名（prefab名に相当）
    pub kind: String,
    /// 巡航速度（m/s）
    pub speed_mps: f64,
    /// 衝突半径（m）
    pub radius_m: f64,
}

impl AdversaryTemplate {
    pub fn new(kind: impl Into<String>, speed_mps: f64, radius_m: f64) -> Self {
        Self { kind: kind.into(), speed_mps, radius_m }
    }
}

/// レジストリが保持する敵艇1隻分の記録
///
/// `name` と `key` はエンティティの破棄・再生成をまたいで不変です。
/// `template` と `original` は初回登録時に一度だけ書き込まれます。
#[derive(Debug, Clone)]
pub struct AdversaryRecord {
    pub key: AdversaryKey,
    pub name: String,
    pub template: AdversaryTemplate,
    pub original: Placement,
    /// 物理側の生存インスタンス（破棄済みで再生成待ちの場合は None）
    pub handle: Option<EntityId>,
    pub alive: bool,
    /// 次のティック境界で物理側から取り除く予定
    pub pending_destroy: bool,
    /// 取り除いた直後にテンプレートから再生成する予定
    pub respawn_requested: bool,
}

impl AdversaryRecord {
    pub fn new(
        key: AdversaryKey,
        name: String,
        template: AdversaryTemplate,
        original: Placement,
        handle: Option<EntityId>,
    ) -> Self {
        Self {
            key,
            name,
            template,
            original,
            alive: handle.is_some(),
            handle,
            pending_destroy: false,
            respawn_requested: false,
        }
    }

    /// 破棄予定ではない生存インスタンスを持っているか
    pub fn is_live(&self) -> bool {
        self.alive && self.handle.is_some() && !self.pending_destroy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_liveness_flags() {
        let mut record = AdversaryRecord::new(
            AdversaryKey(1),
            "raider-1".to_string(),
            AdversaryTemplate::new("attack_boat", 12.0, 4.0),
            Placement::new(Vec2::new(0.0, 3000.0), 180.0, None),
            Some(EntityId(7)),
        );
        assert!(record.is_live());

        record.pending_destroy = true;
        assert!(!record.is_live());

        let unplaced = AdversaryRecord::new(
            AdversaryKey(2),
            "raider-2".to_string(),
            AdversaryTemplate::new("attack_boat", 12.0, 4.0),
            Placement::new(Vec2::new(100.0, 3000.0), 180.0, None),
            None,
        );
        assert!(!unplaced.is_live());
    }

    #[test]
    fn test_zero_placement_is_degenerate() {
        assert!(Placement::new(Vec2::ZERO, 0.0, None).is_degenerate());
        assert!(Placement::new(Vec2::new(5.0, 5.0), f64::NAN, None).is_degenerate());
        assert!(!Placement::new(Vec2::new(5.0, 5.0), 90.0, None).is_degenerate());
    }
}
