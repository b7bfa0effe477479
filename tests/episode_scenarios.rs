//! エピソード制御の結合シナリオ

use std::sync::Arc;

use netdefsim::collision::Contact;
use netdefsim::models::*;
use netdefsim::orchestrator::{EpisodeOrchestrator, EpisodePhase, TerminationReason};
use netdefsim::registry::{EntityRegistry, ResetState};
use netdefsim::reward::RewardShaper;
use netdefsim::scenario::{CaptureMode, ScenarioConfig};
use netdefsim::world::KinematicWorld;

const DT: f64 = 0.1;

fn build(config: ScenarioConfig) -> (EpisodeOrchestrator, KinematicWorld) {
    let config = Arc::new(config);
    let mut world = KinematicWorld::new(config.clone());
    let flagship_id = world.spawn_flagship(config.flagship.position, config.flagship.collision_radius_m);
    let flagship = FlagshipUnit::new(flagship_id, config.flagship.position, config.flagship.collision_radius_m);

    let ids: Vec<EntityId> = config
        .agents
        .iter()
        .map(|a| world.spawn_agent(a.position, a.heading_deg, a.radius_m))
        .collect();
    let agents = AgentPair::new(
        DefenseAgent::new(config.agents[0].name.clone(), ids[0], config.agents[0].placement()),
        DefenseAgent::new(config.agents[1].name.clone(), ids[1], config.agents[1].placement()),
    );

    let mut registry = EntityRegistry::new(config.clone());
    for adversary in &config.adversaries {
        let placement = adversary.placement();
        let template = adversary.template();
        let handle = world.instantiate(&template, placement.position, placement.heading_deg);
        registry.register(&adversary.name, template, placement, Some(handle));
    }

    (EpisodeOrchestrator::new(config, agents, registry, flagship), world)
}

/// 整形報酬を無効にして、離散的な報酬だけを観測できるようにする
fn unshaped() -> ScenarioConfig {
    let mut config = ScenarioConfig::default();
    config.reward.cooperative.weight = 0.0;
    config.reward.tactical.weight = 0.0;
    config.reward.safety.weight = 0.0;
    config
}

fn activate(orchestrator: &mut EpisodeOrchestrator, world: &mut KinematicWorld) {
    orchestrator.begin_episode();
    for _ in 0..50 {
        if orchestrator.phase() == EpisodePhase::Active {
            return;
        }
        orchestrator.step(world, DT);
    }
    panic!("episode never became active");
}

fn handle_of(orchestrator: &EpisodeOrchestrator, index: u32) -> EntityId {
    orchestrator
        .registry()
        .record(AdversaryKey(index))
        .and_then(|r| r.handle)
        .expect("live adversary")
}

fn cumulative(orchestrator: &EpisodeOrchestrator) -> f64 {
    orchestrator.agents().get(0).map_or(0.0, |a| a.cumulative_reward)
}

#[test]
fn simultaneous_triggers_apply_reward_once() {
    let (mut orchestrator, mut world) = build(unshaped());
    activate(&mut orchestrator, &mut world);

    let [first, second] = orchestrator.agents().entities();
    let flagship = orchestrator.flagship().entity;
    let rammer = handle_of(&orchestrator, 0);
    let netted = handle_of(&orchestrator, 1);

    // 同じティックに母艦衝突・味方衝突・捕獲が重なる
    world.push_contact(Contact::new(rammer, flagship, Vec2::ZERO));
    world.push_contact(Contact::new(rammer, flagship, Vec2::ZERO));
    world.push_contact(Contact::new(first, second, Vec2::ZERO));
    world.set_pose(netted, Vec2::new(0.0, 2500.0), 180.0);

    let outcome = orchestrator.step(&mut world, DT);
    assert!(outcome.done);
    assert_eq!(outcome.reason, Some(TerminationReason::FlagshipCollision));
    assert!((outcome.reward - (-1.75)).abs() < 1e-12);

    assert!(!orchestrator.request_termination(TerminationReason::Timeout, Some(10.0)));
    assert!(!orchestrator.on_friendly_collision());

    let mut dones = 1;
    while orchestrator.phase() != EpisodePhase::Active {
        if orchestrator.step(&mut world, DT).done {
            dones += 1;
        }
    }
    assert_eq!(dones, 1);
    assert_eq!(orchestrator.summaries().len(), 1);
    assert_eq!(orchestrator.summaries()[0].total_reward, -1.75);
}

#[test]
fn reset_places_every_adversary_once_at_original_placement() {
    let mut config = unshaped();
    config.capture.mode = CaptureMode::Attrition;
    config.capture.respawn_jitter_radius_m = 200.0;
    let (mut orchestrator, mut world) = build(config);
    activate(&mut orchestrator, &mut world);

    // 1隻はジッタ付きで再生成、1隻は移動、1隻は母艦衝突で破棄
    orchestrator.on_capture_event(AdversaryKey(0), Vec2::ZERO);
    orchestrator.step(&mut world, DT);
    world.set_pose(handle_of(&orchestrator, 1), Vec2::new(300.0, 1200.0), 45.0);
    world.set_speed(handle_of(&orchestrator, 1), 9.0);
    orchestrator.on_flagship_collision(AdversaryKey(2));

    while orchestrator.phase() != EpisodePhase::Active {
        orchestrator.step(&mut world, DT);
    }

    let registry = orchestrator.registry();
    assert_eq!(registry.reset_state(), ResetState::Done);
    assert_eq!(world.adversary_count(), registry.len());
    for record in registry.records() {
        assert!(record.is_live(), "{} not live", record.name);
        let pose = world.get_pose(record.handle.expect("handle")).expect("pose");
        assert_eq!(pose.position, record.original.position);
        assert_eq!(pose.velocity, Vec2::ZERO);
    }
}

#[test]
fn net_tension_maximal_at_band_center() {
    let shaper = RewardShaper::new(Arc::new(ScenarioConfig::default()));
    let at = |separation: f64| {
        shaper
            .cooperative(
                &KinematicSnapshot::new(Vec2::new(0.0, 0.0), 0.0, 5.0),
                &KinematicSnapshot::new(Vec2::new(separation, 0.0), 0.0, 5.0),
            )
            .net_tension
    };

    let peak = at(50.0 * (0.90 + 0.95) / 2.0);
    assert!((peak - 0.0005).abs() < 1e-12);
    for separation in [44.0, 45.0, 45.5, 46.0, 46.5, 47.0, 47.5, 48.0] {
        assert!(at(separation) <= peak, "tension at {} exceeds center", separation);
    }
}

#[test]
fn tracking_gain_is_monotone() {
    let shaper = RewardShaper::new(Arc::new(ScenarioConfig::default()));
    let first = KinematicSnapshot::new(Vec2::new(-25.0, 0.0), 0.0, 0.0);
    let second = KinematicSnapshot::new(Vec2::new(25.0, 0.0), 0.0, 0.0);

    // 網の軸上から接近させ、直交ボーナスが入らないようにする
    let run = |distances: Vec<f64>| {
        let mut previous = None;
        let mut total = 0.0;
        for distance in distances {
            let adversary = [KinematicSnapshot::new(Vec2::new(distance, 0.0), 270.0, 12.0)];
            let (reward, nearest) = shaper.tactical(&first, &second, Vec2::ZERO, &adversary, previous);
            total += reward;
            previous = nearest;
        }
        total
    };

    let closing: Vec<f64> = (0..10).map(|i| 500.0 - 12.0 * i as f64).collect();
    let opening: Vec<f64> = (0..10).map(|i| 500.0 + 12.0 * i as f64).collect();
    assert!(run(closing) > 0.0);
    assert_eq!(run(opening), 0.0);
}

#[test]
fn ring_penalties_apply_once_per_ring_despite_oscillation() {
    let (mut orchestrator, mut world) = build(unshaped());
    activate(&mut orchestrator, &mut world);
    let raider = handle_of(&orchestrator, 1);

    for y in [2600.0, 1900.0, 2100.0, 1950.0, 900.0, 1100.0, 950.0, 2200.0, 800.0] {
        world.set_pose(raider, Vec2::new(0.0, y), 180.0);
        let outcome = orchestrator.step(&mut world, DT);
        assert!(!outcome.done);
    }

    assert_eq!(orchestrator.ring_flags(), [true, true]);
    assert!((cumulative(&orchestrator) - (-0.2)).abs() < 1e-12);
}

#[test]
fn attrition_mode_ends_on_third_capture() {
    let mut config = unshaped();
    config.capture.mode = CaptureMode::Attrition;
    config.capture.max_collision_count = 3;
    let (mut orchestrator, mut world) = build(config);
    activate(&mut orchestrator, &mut world);
    let net_center = Vec2::new(0.0, 2500.0);

    for (index, expect_done) in [(0, false), (1, false), (2, true)] {
        let handle = handle_of(&orchestrator, index);
        world.set_pose(handle, net_center, 180.0);
        let outcome = orchestrator.step(&mut world, DT);

        assert_eq!(outcome.done, expect_done, "capture {}", index + 1);
        if expect_done {
            assert_eq!(outcome.reason, Some(TerminationReason::Capture));
            assert!((outcome.reward - (1.3 + 0.5)).abs() < 1e-12);
        } else {
            assert!((outcome.reward - 1.3).abs() < 1e-12);
            assert_eq!(orchestrator.phase(), EpisodePhase::Active);

            // 次のティック境界で、捕獲された個体だけが作り直される
            orchestrator.step(&mut world, DT);
            let respawned = handle_of(&orchestrator, index);
            assert_ne!(respawned, handle);
            assert!(!world.contains(handle));
            assert_eq!(orchestrator.registry().live_count(), 3);
        }
    }
    assert_eq!(orchestrator.summaries()[0].captures, 3);
}

#[test]
fn lone_adversary_recaptured_across_respawns_until_attrition_limit() {
    let mut config = unshaped();
    config.capture.mode = CaptureMode::Attrition;
    config.capture.max_collision_count = 3;
    config.adversaries.truncate(1);
    let cooldown_steps = (config.episode.collision_cooldown_s / DT).ceil() as usize + 1;
    let (mut orchestrator, mut world) = build(config);
    activate(&mut orchestrator, &mut world);
    let net_center = Vec2::new(0.0, 2500.0);
    let mut previous = handle_of(&orchestrator, 0);

    for capture in 1..=3u32 {
        let handle = handle_of(&orchestrator, 0);
        world.set_pose(handle, net_center, 180.0);
        let outcome = orchestrator.step(&mut world, DT);

        if capture < 3 {
            assert!(!outcome.done, "capture {} ended with {:?}", capture, outcome.reason);
            assert_eq!(orchestrator.capture_count(), capture);

            orchestrator.step(&mut world, DT);
            let respawned = handle_of(&orchestrator, 0);
            assert_ne!(respawned, handle);
            assert_ne!(respawned, previous);
            assert_eq!(orchestrator.registry().live_count(), 1);
            previous = respawned;

            for _ in 0..cooldown_steps {
                assert!(!orchestrator.step(&mut world, DT).done);
            }
        } else {
            assert!(outcome.done);
            assert_eq!(outcome.reason, Some(TerminationReason::Capture));
        }
    }

    let summaries = orchestrator.summaries();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].captures, 3);
}

#[test]
fn netting_every_adversary_in_one_tick_keeps_episode_running() {
    let mut config = unshaped();
    config.capture.mode = CaptureMode::Attrition;
    config.capture.max_collision_count = 5;
    let (mut orchestrator, mut world) = build(config);
    activate(&mut orchestrator, &mut world);

    let handles: Vec<EntityId> = (0..3).map(|i| handle_of(&orchestrator, i)).collect();
    for (offset, &handle) in [-10.0, 0.0, 10.0].iter().zip(&handles) {
        world.set_pose(handle, Vec2::new(*offset, 2500.0), 180.0);
    }

    let outcome = orchestrator.step(&mut world, DT);
    assert!(!outcome.done, "ended with {:?}", outcome.reason);
    assert_eq!(orchestrator.capture_count(), 3);
    assert_eq!(orchestrator.registry().live_count(), 0);
    assert_eq!(orchestrator.registry().surviving_count(), 3);

    assert!(!orchestrator.step(&mut world, DT).done);
    assert_eq!(orchestrator.registry().live_count(), 3);
    for (index, handle) in handles.iter().enumerate() {
        assert!(!world.contains(*handle));
        assert_ne!(handle_of(&orchestrator, index as u32), *handle);
    }
    assert_eq!(orchestrator.phase(), EpisodePhase::Active);
}

#[test]
fn timeout_fires_once_and_waits_for_reset_completion() {
    let mut config = unshaped();
    config.episode.max_ticks = 50;
    config.episode.settle_ticks = 3;
    let (mut orchestrator, mut world) = build(config);
    activate(&mut orchestrator, &mut world);

    let mut timeout_ticks = None;
    for _ in 0..49 {
        assert!(!orchestrator.step(&mut world, DT).done);
    }
    let outcome = orchestrator.step(&mut world, DT);
    if outcome.done {
        timeout_ticks = orchestrator.summaries().last().map(|s| s.ticks);
    }
    assert_eq!(outcome.reason, Some(TerminationReason::Timeout));
    assert_eq!(timeout_ticks, Some(50));
    assert_eq!(orchestrator.phase(), EpisodePhase::Resetting);

    let mut resetting_steps = 0;
    while orchestrator.phase() == EpisodePhase::Resetting {
        assert_ne!(orchestrator.registry().reset_state(), ResetState::Done);
        assert_eq!(orchestrator.tick_count(), 0);
        assert!(!orchestrator.step(&mut world, DT).done);
        resetting_steps += 1;
        assert!(resetting_steps < 20);
    }

    assert!(resetting_steps > 1, "reset should span several ticks");
    assert_eq!(orchestrator.phase(), EpisodePhase::Active);
    assert_eq!(orchestrator.registry().reset_state(), ResetState::Done);
    assert_eq!(orchestrator.summaries().len(), 1);
    assert_eq!(orchestrator.episode_index(), 2);
}

#[test]
fn destroyed_adversary_recreated_identical_to_registration() {
    let config = Arc::new(ScenarioConfig::default());
    let mut world = KinematicWorld::new(config.clone());
    let mut registry = EntityRegistry::new(config.clone());

    let template = AdversaryTemplate::new("fast_attack_craft", 17.5, 3.25);
    let placement = Placement::new(Vec2::new(-431.25, 3987.5), 187.5, None);
    let handle = world.instantiate(&template, placement.position, placement.heading_deg);
    let key = registry.register("raider-x", template.clone(), placement.clone(), Some(handle));

    world.set_pose(handle, Vec2::new(12.0, 1500.0), 93.0);
    world.set_speed(handle, 17.5);
    assert!(registry.destroy(key));
    registry.flush_pending(&mut world);
    assert!(!world.contains(handle));

    registry.begin_reset();
    while registry.advance_reset(&mut world) != ResetState::Done {}

    let record = registry.record(key).expect("record");
    assert_eq!(record.key, key);
    assert_eq!(record.name, "raider-x");
    assert_eq!(record.template, template);
    assert_eq!(record.original, placement);

    let recreated = record.handle.expect("recreated");
    assert_ne!(recreated, handle);
    let pose = world.get_pose(recreated).expect("pose");
    assert_eq!(pose.position.x.to_bits(), placement.position.x.to_bits());
    assert_eq!(pose.position.y.to_bits(), placement.position.y.to_bits());
    assert_eq!(pose.heading_deg.to_bits(), placement.heading_deg.to_bits());
}
