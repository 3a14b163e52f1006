//! Closed-loop moves, jogs and velocity runs on a simulated linear stage.

use stepper_common::axis::command::AxisCommand;
use stepper_common::axis::params::{AxisFlags, StoredState};
use stepper_common::axis::types::Direction;
use stepper_common::consts::BLANK_STORED_POSITION;
use stepper_control_unit::persistence::MemoryStore;
use stepper_control_unit::state::Mode;

use super::{Bench, linear_params, linear_sim};

#[test]
fn goto_settles_inside_deadband() {
    let mut b = Bench::new(linear_params(AxisFlags::empty()), linear_sim());
    b.connect();
    b.send(AxisCommand::MoveAbsolute { target: 5000 });

    assert!(b.run_until(2000, |a| a.mode() == Mode::Idle), "goto never settled");
    let pos = b.axis().enc.pos;
    assert!((pos - 5000).abs() <= 5, "settled at {pos}");
    assert_eq!(b.axis().counters.cmnd_pos, pos);
    assert!(b.bus.lock().unwrap().running(0).is_none());
}

#[test]
fn relative_move_is_taken_from_the_encoder() {
    let mut b = Bench::new(linear_params(AxisFlags::empty()), linear_sim());
    b.connect();
    b.send(AxisCommand::MoveAbsolute { target: 2000 });
    assert!(b.run_until(2000, |a| a.mode() == Mode::Idle));
    let start = b.axis().enc.pos;

    b.send(AxisCommand::MoveRelative { distance: -1500 });
    assert!(b.run_until(2000, |a| a.mode() == Mode::Idle));
    assert!((b.axis().enc.pos - (start - 1500)).abs() <= 5);
}

#[test]
fn holding_axis_pulls_back_after_disturbance() {
    let mut p = linear_params(AxisFlags::USE_PID);
    p.drive.kickout_time = u8::MAX;
    let mut b = Bench::new(p, linear_sim());
    b.connect();
    b.ticks(20);
    assert_eq!(b.axis().mode(), Mode::Pid);

    b.bus.lock().unwrap().set_stage_position(0, 300.0);
    b.ticks(80);
    let pos = b.axis().enc.pos;
    assert!(pos.abs() <= 5, "held at {pos}");
    assert_eq!(b.axis().mode(), Mode::Pid);
}

#[test]
fn jog_moves_one_step() {
    let mut p = linear_params(AxisFlags::empty());
    p.jog.step_size = 750;
    let mut b = Bench::new(p, linear_sim());
    b.connect();

    b.send(AxisCommand::Jog {
        direction: Direction::Forward,
    });
    b.tick();
    assert_eq!(b.axis().mode(), Mode::Jog);
    assert!(b.run_until(2000, |a| a.mode() == Mode::Idle));
    assert!((b.axis().enc.pos - 750).abs() <= 5);

    b.send(AxisCommand::Jog {
        direction: Direction::Reverse,
    });
    assert!(b.run_until(2000, |a| a.mode() == Mode::Idle));
    assert!(b.axis().enc.pos.abs() <= 10);
}

#[test]
fn velocity_percent_scales_the_run_speed() {
    let mut b = Bench::new(linear_params(AxisFlags::empty()), linear_sim());
    b.connect();
    b.send(AxisCommand::VelocityPercent {
        direction: Direction::Forward,
        percent: 50,
    });
    b.ticks(10);

    assert_eq!(b.axis().mode(), Mode::Run);
    let unbound = b.axis().speeds.unbound();
    assert_eq!(b.bus.lock().unwrap().max_speed_issued(0), unbound * 50 / 100 * 1024);
    assert!(b.stage() > 0.0);

    b.send(AxisCommand::VelocityPercent {
        direction: Direction::Forward,
        percent: 0,
    });
    b.ticks(2);
    assert_eq!(b.axis().mode(), Mode::Idle);
    assert!(b.bus.lock().unwrap().running(0).is_none());
}

#[test]
fn stored_position_recall_marks_the_slot() {
    let mut stored = StoredState {
        stored_pos_deadband: 10,
        ..Default::default()
    };
    stored.stored_pos[3] = 4000;
    let mut b = Bench::with_store(
        linear_params(AxisFlags::empty()),
        linear_sim(),
        Box::new(MemoryStore::with_state(stored)),
    );
    b.connect();
    assert_eq!(b.sched.report().unwrap().current_stored, None);

    b.send(AxisCommand::GotoStored { index: 3 });
    assert!(b.run_until(2000, |a| a.mode() == Mode::Idle));
    b.tick();
    assert_eq!(b.sched.report().unwrap().current_stored, Some(3));
}

#[test]
fn blank_stored_slot_does_not_move() {
    let mut b = Bench::new(linear_params(AxisFlags::empty()), linear_sim());
    b.connect();
    assert_eq!(b.axis().store.stored_pos[1], BLANK_STORED_POSITION);

    b.send(AxisCommand::GotoStored { index: 1 });
    b.ticks(5);
    assert_eq!(b.axis().mode(), Mode::Idle);
    assert_eq!(b.bus.lock().unwrap().run_count(0), 0);
}
