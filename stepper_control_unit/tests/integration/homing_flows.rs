//! Homing sessions driven through the host command path.

use stepper_common::axis::command::AxisCommand;
use stepper_common::axis::params::{AxisFlags, StoredState};
use stepper_common::axis::status::StatusBits;
use stepper_common::axis::types::{EncoderType, HomeDirection, HomeTarget, HomedStatus};
use stepper_control_unit::hal::sim::SimAxisConfig;
use stepper_control_unit::persistence::MemoryStore;
use stepper_control_unit::state::{HomingMode, Mode};

use super::{Bench, linear_params, linear_sim};

#[test]
fn ccw_limit_homing_zeroes_on_the_switch() {
    let mut p = linear_params(AxisFlags::empty());
    p.home.home_dir = HomeDirection::Ccw;
    p.home.target = HomeTarget::Limit;
    let sim = SimAxisConfig {
        ccw_limit: Some(0),
        start_pos: 3000,
        ..linear_sim()
    };
    let mut b = Bench::new(p, sim);
    b.connect();
    assert_eq!(b.axis().enc.pos, 0);

    b.send(AxisCommand::Home);
    b.tick();
    assert_eq!(b.axis().mode(), Mode::Homing);
    assert!(b.axis().status.contains(StatusBits::HOMING));
    assert!(b.bus.lock().unwrap().zero_on_limit_armed(0));

    assert!(b.run_until(1000, |a| a.mode() == Mode::Idle), "limit never found");
    let a = b.axis();
    assert_eq!(a.enc.homed, HomedStatus::Homed);
    assert_eq!(a.limits.homed, HomedStatus::Homed);
    assert!(a.ctrl.homing_mode.is_idle());
    // Zeroed on the switch edge, then coasted through the debounce.
    assert!((-400..=0).contains(&a.enc.pos), "homed at {}", a.enc.pos);
    assert!(a.status.contains(StatusBits::HOMED | StatusBits::CCW_LIMIT));
    assert!(!b.bus.lock().unwrap().zero_on_limit_armed(0));
}

#[test]
fn index_homing_stops_on_the_pulse() {
    let mut p = linear_params(AxisFlags::HAS_INDEX);
    p.home.home_dir = HomeDirection::Cw;
    p.home.target = HomeTarget::Index;
    let sim = SimAxisConfig {
        index_at: Some(2500),
        start_pos: 1000,
        ..linear_sim()
    };
    let mut b = Bench::new(p, sim);
    b.connect();
    b.send(AxisCommand::Home);

    assert!(b.run_until(1000, |a| a.mode() == Mode::Idle), "index never found");
    let a = b.axis();
    assert_eq!(a.enc.homed, HomedStatus::Homed);
    assert!((0..200).contains(&a.enc.pos), "homed at {}", a.enc.pos);
    assert!(b.stage() > 2500.0);
}

#[test]
fn absolute_zero_homing_drops_the_offset() {
    let mut p = linear_params(AxisFlags::empty());
    p.encoder.kind = EncoderType::AbsBissLinear;
    let sim = SimAxisConfig {
        encoder: EncoderType::AbsBissLinear,
        start_pos: 2000,
        ..Default::default()
    };
    let stored = StoredState {
        enc_zero: 500,
        ..Default::default()
    };
    let mut b = Bench::with_store(p, sim, Box::new(MemoryStore::with_state(stored)));
    b.connect();
    assert_eq!(b.axis().enc.pos, 1500);

    b.send(AxisCommand::Home);
    b.ticks(2);
    let a = b.axis();
    assert_eq!(a.mode(), Mode::Idle);
    assert_eq!(a.enc.homed, HomedStatus::Homed);
    assert_eq!(a.enc.zero, 0);
    assert_eq!(a.enc.pos, 2000);
    assert_eq!(b.bus.lock().unwrap().run_count(0), 0);
}

#[test]
fn home_refused_with_soft_limits() {
    let mut p = linear_params(AxisFlags::empty());
    p.limits.cw_soft_limit = 50_000;
    let mut b = Bench::new(p, linear_sim());
    b.connect();

    b.send(AxisCommand::Home);
    b.ticks(3);
    let a = b.axis();
    assert_eq!(a.mode(), Mode::Idle);
    assert_eq!(a.ctrl.homing_mode, HomingMode::Idle);
    assert_eq!(a.enc.homed, HomedStatus::NotHomed);
    assert!(!b.bus.lock().unwrap().zero_on_limit_armed(0));
}

#[test]
fn stop_during_homing_abandons_the_session() {
    let mut p = linear_params(AxisFlags::empty());
    p.home.home_dir = HomeDirection::Ccw;
    let sim = SimAxisConfig {
        ccw_limit: Some(0),
        start_pos: 50_000,
        ..linear_sim()
    };
    let mut b = Bench::new(p, sim);
    b.connect();
    b.send(AxisCommand::Home);
    b.ticks(10);
    assert_eq!(b.axis().mode(), Mode::Homing);

    b.send(AxisCommand::Stop);
    b.ticks(2);
    let a = b.axis();
    assert_eq!(a.mode(), Mode::Idle);
    assert_eq!(a.enc.homed, HomedStatus::NotHomed);
    assert_eq!(a.limits.homed, HomedStatus::NotHomed);
    assert!(!b.bus.lock().unwrap().zero_on_limit_armed(0));
}
