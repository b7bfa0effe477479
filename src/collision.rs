//! # Collision モジュール
//!
//! 物理コラボレータからの生の接触通知 `(source, target, point)` を
//! ドメインイベントへ変換します。
//!
//! 接触コールバックは1回の実接触で何度も発火しうるため、発生源ごとの
//! クールダウン（エピソード状態が保持）で窓内の重複を捨てます。

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::models::barrier::CaptureBarrier;
use crate::models::common::{AdversaryKey, EntityId, KinematicSnapshot, Vec2};
use crate::registry::EntityRegistry;
use crate::scenario::ScenarioConfig;

/// 物理側からの接触通知
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    pub source: EntityId,
    pub target: EntityId,
    pub point: Vec2,
}

impl Contact {
    pub fn new(source: EntityId, target: EntityId, point: Vec2) -> Self {
        Self { source, target, point }
    }
}

/// エピソード制御が扱うドメインイベント
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DomainEvent {
    /// 敵艇が網に掛かった
    Capture { adversary: AdversaryKey, impact: Vec2 },
    /// 敵艇が母艦に衝突した
    FlagshipCollision { adversary: AdversaryKey },
    /// 味方同士、または味方と母艦の衝突
    FriendlyCollision { source: EntityId, target: EntityId },
}

/// クールダウンの発生源キー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CooldownKey {
    Capture(AdversaryKey),
    Flagship(AdversaryKey),
    Friendly(EntityId),
}

/// 発生源ごとの最終受理時刻
#[derive(Debug, Clone, Default)]
pub struct CollisionCooldowns {
    window_s: f64,
    last_accepted: HashMap<CooldownKey, f64>,
}

impl CollisionCooldowns {
    pub fn new(window_s: f64) -> Self {
        Self { window_s, last_accepted: HashMap::new() }
    }

    /// 窓外なら受理して時刻を記録する
    pub fn try_accept(&mut self, key: CooldownKey, now_s: f64) -> bool {
        if let Some(&last) = self.last_accepted.get(&key) {
            if now_s - last < self.window_s {
                return false;
            }
        }
        self.last_accepted.insert(key, now_s);
        true
    }

    pub fn clear(&mut self) {
        self.last_accepted.clear();
    }

    pub fn len(&self) -> usize {
        self.last_accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_accepted.is_empty()
    }
}

/// 接触分類に使う登場エンティティ一覧
#[derive(Debug, Clone, Copy)]
pub struct ContactRoster<'a> {
    pub agents: [EntityId; 2],
    pub flagship: EntityId,
    pub registry: &'a EntityRegistry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Party {
    Agent,
    Flagship,
    Barrier,
    Adversary(AdversaryKey),
    Unknown,
}

impl ContactRoster<'_> {
    fn party(&self, id: EntityId) -> Party {
        if id == EntityId::BARRIER {
            Party::Barrier
        } else if self.agents.contains(&id) {
            Party::Agent
        } else if id == self.flagship {
            Party::Flagship
        } else if let Some(key) = self.registry.key_of(id) {
            Party::Adversary(key)
        } else {
            Party::Unknown
        }
    }
}

/// 1ティック分の敵艇観測（接触合成・報酬計算で共用）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdversarySighting {
    pub key: AdversaryKey,
    pub entity: EntityId,
    pub snapshot: KinematicSnapshot,
    pub radius_m: f64,
}

/// 接触ルーター
#[derive(Debug, Clone)]
pub struct CollisionRouter {
    config: Arc<ScenarioConfig>,
}

impl CollisionRouter {
    pub fn new(config: Arc<ScenarioConfig>) -> Self {
        Self { config }
    }

    pub fn cooldown_window_s(&self) -> f64 {
        self.config.episode.collision_cooldown_s
    }

    /// 接触を分類し、クールダウンを適用してイベントを返す
    ///
    /// 対象外の組み合わせ、非アクティブな網、窓内の重複はいずれも None。
    pub fn route(
        &self,
        contact: &Contact,
        roster: &ContactRoster<'_>,
        barrier: Option<&CaptureBarrier>,
        cooldowns: &mut CollisionCooldowns,
        now_s: f64,
    ) -> Option<DomainEvent> {
        let (event, key) = classify(contact, roster, barrier)?;
        if !cooldowns.try_accept(key, now_s) {
            debug!("クールダウン中の接触を破棄: {:?} ({} -> {})", key, contact.source, contact.target);
            return None;
        }
        Some(event)
    }

    /// 網と重なっている敵艇について合成接触を作る
    ///
    /// 網は物理側に実体を持たないため、網との接触はここで検出します。
    pub fn barrier_contacts(&self, barrier: &CaptureBarrier, sightings: &[AdversarySighting]) -> Vec<Contact> {
        if !barrier.active {
            return Vec::new();
        }
        sightings
            .iter()
            .filter(|s| barrier.intersects(s.snapshot.position, s.radius_m))
            .map(|s| {
                trace!("網接触: {} ({})", s.key, s.entity);
                Contact::new(s.entity, EntityId::BARRIER, s.snapshot.position)
            })
            .collect()
    }
}

fn classify(
    contact: &Contact,
    roster: &ContactRoster<'_>,
    barrier: Option<&CaptureBarrier>,
) -> Option<(DomainEvent, CooldownKey)> {
    let source = roster.party(contact.source);
    let target = roster.party(contact.target);

    match (source, target) {
        (Party::Adversary(key), Party::Barrier) | (Party::Barrier, Party::Adversary(key)) => {
            if !barrier.is_some_and(|b| b.active) {
                return None;
            }
            if !roster.registry.is_live(key) {
                return None;
            }
            Some((DomainEvent::Capture { adversary: key, impact: contact.point }, CooldownKey::Capture(key)))
        }
        (Party::Adversary(key), Party::Flagship) | (Party::Flagship, Party::Adversary(key)) => {
            if !roster.registry.is_live(key) {
                return None;
            }
            Some((DomainEvent::FlagshipCollision { adversary: key }, CooldownKey::Flagship(key)))
        }
        (Party::Agent, Party::Agent) | (Party::Agent, Party::Flagship) | (Party::Flagship, Party::Agent) => {
            let agent = if source == Party::Agent { contact.source } else { contact.target };
            let other = if agent == contact.source { contact.target } else { contact.source };
            // 味方同士は小さいIDを発生源に揃え、双方向の通知を同一視する
            let cooldown_source = if target == Party::Agent { agent.min(other) } else { agent };
            Some((
                DomainEvent::FriendlyCollision { source: agent, target: other },
                CooldownKey::Friendly(cooldown_source),
            ))
        }
        _ => None,
    }
}
