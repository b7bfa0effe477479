//! # World モジュール
//!
//! `WorldPhysics` のプロセス内実装です。艦艇を質点として扱い、
//! 固定時間刻みで等速・一定旋回率の運動を積分します。
//!
//! - 味方艇: `ActionCommand` の推力で目標速度へ加減速し、旋回指令で方位を変える
//! - 敵艇: 航路のウェイポイントを順に辿り、航路終了後は母艦へ直進する
//! - 母艦: 静止
//!
//! 接触は円同士の重なりで判定し、重なっている間は毎ティック通知します。
//! 重複通知の抑制は接触ルーター側の責務です。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::collision::Contact;
use crate::models::adversary::{AdversaryTemplate, PathRef};
use crate::models::agent::ActionCommand;
use crate::models::common::{EntityId, Pose, Vec2, math_utils};
use crate::models::traits::WorldPhysics;
use crate::scenario::ScenarioConfig;

/// ウェイポイント到達とみなす距離（m）
const WAYPOINT_ARRIVAL_M: f64 = 5.0;

#[derive(Debug, Clone)]
enum BodyKind {
    Agent { command: ActionCommand },
    Flagship,
    Adversary { cruise_speed_mps: f64, waypoints: Vec<Vec2>, next_waypoint: usize },
}

#[derive(Debug, Clone)]
struct Body {
    kind: BodyKind,
    position: Vec2,
    heading_deg: f64,
    speed_mps: f64,
    radius_m: f64,
}

impl Body {
    fn velocity(&self) -> Vec2 {
        Vec2::from_heading(self.heading_deg) * self.speed_mps
    }

    fn is_adversary(&self) -> bool {
        matches!(self.kind, BodyKind::Adversary { .. })
    }
}

/// 質点運動のワールド
#[derive(Debug)]
pub struct KinematicWorld {
    config: Arc<ScenarioConfig>,
    next_id: u64,
    bodies: BTreeMap<EntityId, Body>,
    paths: HashMap<String, Vec<Vec2>>,
    contacts: Vec<Contact>,
}

impl KinematicWorld {
    pub fn new(config: Arc<ScenarioConfig>) -> Self {
        let paths = config
            .paths
            .iter()
            .map(|p| (p.name.clone(), p.waypoints.clone()))
            .collect();
        Self {
            config,
            next_id: 1,
            bodies: BTreeMap::new(),
            paths,
            contacts: Vec::new(),
        }
    }

    fn insert(&mut self, body: Body) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        self.bodies.insert(id, body);
        id
    }

    pub fn spawn_agent(&mut self, position: Vec2, heading_deg: f64, radius_m: f64) -> EntityId {
        self.insert(Body {
            kind: BodyKind::Agent { command: ActionCommand::IDLE },
            position,
            heading_deg: math_utils::wrap_heading(heading_deg),
            speed_mps: 0.0,
            radius_m,
        })
    }

    pub fn spawn_flagship(&mut self, position: Vec2, radius_m: f64) -> EntityId {
        self.insert(Body {
            kind: BodyKind::Flagship,
            position,
            heading_deg: 0.0,
            speed_mps: 0.0,
            radius_m,
        })
    }

    /// 外部からの接触通知を積む（次の `drain_contacts` で取り出される）
    pub fn push_contact(&mut self, contact: Contact) {
        self.contacts.push(contact);
    }

    /// 速度を直接設定する
    pub fn set_speed(&mut self, id: EntityId, speed_mps: f64) {
        if let Some(body) = self.bodies.get_mut(&id) {
            body.speed_mps = speed_mps.max(0.0);
        }
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn adversary_count(&self) -> usize {
        self.bodies.values().filter(|b| b.is_adversary()).count()
    }

    /// 運動を `dt` 秒進め、重なりを接触として記録する
    pub fn advance(&mut self, dt: f64) {
        let vessel = &self.config.vessel;
        let destination = self.config.flagship.position;

        for body in self.bodies.values_mut() {
            match &mut body.kind {
                BodyKind::Agent { command } => {
                    let target_speed = command.thrust().max(0.0) * vessel.max_speed_mps;
                    let max_delta = vessel.max_accel_mps2 * dt;
                    body.speed_mps += (target_speed - body.speed_mps).clamp(-max_delta, max_delta);
                    body.heading_deg =
                        math_utils::wrap_heading(body.heading_deg + command.turn() * vessel.max_turn_rate_deg_s * dt);
                }
                BodyKind::Flagship => continue,
                BodyKind::Adversary { cruise_speed_mps, waypoints, next_waypoint } => {
                    let goal = match waypoints.get(*next_waypoint) {
                        Some(&waypoint) if body.position.distance(&waypoint) <= WAYPOINT_ARRIVAL_M => {
                            *next_waypoint += 1;
                            waypoints.get(*next_waypoint).copied().unwrap_or(destination)
                        }
                        Some(&waypoint) => waypoint,
                        None => destination,
                    };
                    let to_goal = goal - body.position;
                    if to_goal.magnitude() > f64::EPSILON {
                        body.heading_deg = math_utils::wrap_heading(math_utils::rad_to_deg(to_goal.x.atan2(to_goal.y)));
                    }
                    let max_delta = vessel.max_accel_mps2 * dt;
                    body.speed_mps += (*cruise_speed_mps - body.speed_mps).clamp(-max_delta, max_delta);
                }
            }
            body.position = body.position + body.velocity() * dt;
        }

        self.detect_overlaps();
    }

    fn detect_overlaps(&mut self) {
        let bodies: Vec<(EntityId, &Body)> = self.bodies.iter().map(|(id, b)| (*id, b)).collect();
        let mut found = Vec::new();
        for (i, (id_a, a)) in bodies.iter().enumerate() {
            for (id_b, b) in bodies.iter().skip(i + 1) {
                if a.is_adversary() && b.is_adversary() {
                    continue;
                }
                if a.position.distance(&b.position) <= a.radius_m + b.radius_m {
                    found.push(Contact::new(*id_a, *id_b, a.position.midpoint(&b.position)));
                }
            }
        }
        if !found.is_empty() {
            trace!("重なり検出: {}件", found.len());
        }
        self.contacts.extend(found);
    }
}

impl WorldPhysics for KinematicWorld {
    fn get_pose(&self, id: EntityId) -> Option<Pose> {
        self.bodies
            .get(&id)
            .map(|b| Pose::new(b.position, b.heading_deg, b.velocity()))
    }

    fn set_pose(&mut self, id: EntityId, position: Vec2, heading_deg: f64) {
        if let Some(body) = self.bodies.get_mut(&id) {
            body.position = position;
            body.heading_deg = math_utils::wrap_heading(heading_deg);
        }
    }

    fn zero_velocity(&mut self, id: EntityId) {
        if let Some(body) = self.bodies.get_mut(&id) {
            body.speed_mps = 0.0;
            if let BodyKind::Agent { command } = &mut body.kind {
                *command = ActionCommand::IDLE;
            }
        }
    }

    fn instantiate(&mut self, template: &AdversaryTemplate, position: Vec2, heading_deg: f64) -> EntityId {
        let id = self.insert(Body {
            kind: BodyKind::Adversary {
                cruise_speed_mps: template.speed_mps,
                waypoints: Vec::new(),
                next_waypoint: 0,
            },
            position,
            heading_deg: math_utils::wrap_heading(heading_deg),
            speed_mps: 0.0,
            radius_m: template.radius_m,
        });
        debug!("{} を生成: {}", template.kind, id);
        id
    }

    fn destroy(&mut self, id: EntityId) {
        if self.bodies.remove(&id).is_some() {
            debug!("{} を破棄", id);
        }
    }

    fn contains(&self, id: EntityId) -> bool {
        self.bodies.contains_key(&id)
    }

    fn reset_path(&mut self, id: EntityId, path: Option<&PathRef>) {
        let resolved = path.and_then(|p| self.paths.get(&p.0)).cloned().unwrap_or_default();
        if let Some(Body { kind: BodyKind::Adversary { waypoints, next_waypoint, .. }, .. }) = self.bodies.get_mut(&id) {
            *waypoints = resolved;
            *next_waypoint = 0;
        }
    }

    fn apply_command(&mut self, id: EntityId, command: ActionCommand) {
        if let Some(Body { kind: BodyKind::Agent { command: current }, .. }) = self.bodies.get_mut(&id) {
            *current = command;
        }
    }

    fn drain_contacts(&mut self) -> Vec<Contact> {
        std::mem::take(&mut self.contacts)
    }
}
