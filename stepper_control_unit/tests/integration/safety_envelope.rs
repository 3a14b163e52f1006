//! Hard limits, soft limits, collisions and the emergency stop.

use stepper_common::axis::command::AxisCommand;
use stepper_common::axis::params::AxisFlags;
use stepper_common::axis::status::StatusBits;
use stepper_common::axis::types::Direction;
use stepper_control_unit::hal::sim::SimAxisConfig;
use stepper_control_unit::state::Mode;

use super::{Bench, linear_params, linear_sim};

#[test]
fn run_into_cw_limit_stops_and_reports() {
    let sim = SimAxisConfig {
        cw_limit: Some(2000),
        ..linear_sim()
    };
    let mut b = Bench::new(linear_params(AxisFlags::empty()), sim);
    b.connect();
    b.send(AxisCommand::Velocity {
        direction: Direction::Forward,
    });

    assert!(b.run_until(500, |a| a.mode() == Mode::Idle), "run never vetoed");
    assert!(b.stage() >= 2000.0);
    assert!(b.axis().status.contains(StatusBits::CW_LIMIT));
    assert!(b.bus.lock().unwrap().running(0).is_none());

    // Further runs into the switch are refused; backing off is allowed.
    b.send(AxisCommand::Velocity {
        direction: Direction::Forward,
    });
    b.ticks(2);
    assert_eq!(b.axis().mode(), Mode::Idle);

    b.send(AxisCommand::Velocity {
        direction: Direction::Reverse,
    });
    b.ticks(3);
    assert_eq!(b.axis().mode(), Mode::Run);
    assert!(b.axis().status.contains(StatusBits::CCW_MOVE));
}

#[test]
fn collision_disables_the_channel() {
    let mut p = linear_params(AxisFlags::empty());
    p.stage.collision_threshold = 200;
    let sim = SimAxisConfig {
        cw_wall: Some(1500),
        ..linear_sim()
    };
    let mut b = Bench::new(p, sim);
    b.connect();
    b.send(AxisCommand::Velocity {
        direction: Direction::Forward,
    });

    assert!(b.run_until(500, |a| !a.enabled), "collision not detected");
    assert_eq!(b.axis().mode(), Mode::Idle);
    assert!(b.bus.lock().unwrap().running(0).is_none());
    assert!(!b.axis().status.contains(StatusBits::CHANNEL_ENABLED));

    // A disabled channel ignores motion until re-enabled.
    b.send(AxisCommand::MoveAbsolute { target: 0 });
    b.ticks(3);
    assert!(b.bus.lock().unwrap().running(0).is_none());

    b.send(AxisCommand::SetChannelEnable { enabled: true });
    b.send(AxisCommand::MoveAbsolute { target: 0 });
    assert!(b.run_until(2000, |a| a.mode() == Mode::Idle && a.enc.pos.abs() <= 5));
    assert!(!b.axis().collision);
}

#[test]
fn emergency_stop_halts_a_run() {
    let mut b = Bench::new(linear_params(AxisFlags::empty()), linear_sim());
    b.connect();
    b.send(AxisCommand::Velocity {
        direction: Direction::Forward,
    });
    b.ticks(5);
    assert!(b.bus.lock().unwrap().running(0).is_some());

    b.signals.raise_em_stop(0);
    b.tick();
    assert_eq!(b.axis().mode(), Mode::Idle);
    assert!(b.bus.lock().unwrap().running(0).is_none());
    assert!(!b.signals.take_em_stop(0));
}

#[test]
fn soft_limit_ends_a_move_early() {
    let mut p = linear_params(AxisFlags::empty());
    p.limits.cw_soft_limit = 3000;
    let mut b = Bench::new(p, linear_sim());
    b.connect();
    b.send(AxisCommand::MoveAbsolute { target: 8000 });

    assert!(b.run_until(2000, |a| a.mode() == Mode::Idle));
    let pos = b.axis().enc.pos;
    assert!(pos > 3000 && pos < 3300, "stopped at {pos}");
    assert!(b.axis().status.contains(StatusBits::CW_SOFT_LIMIT));

    // Targets further out are refused outright.
    b.send(AxisCommand::MoveAbsolute { target: 9000 });
    b.ticks(3);
    assert_eq!(b.axis().enc.pos, pos);

    b.send(AxisCommand::MoveAbsolute { target: 1000 });
    assert!(b.run_until(2000, |a| a.mode() == Mode::Idle && (a.enc.pos - 1000).abs() <= 5));
    assert!(!b.axis().status.contains(StatusBits::CW_SOFT_LIMIT));
}
