//! End-to-end scenarios against the simulated device

mod common;

use common::{config, record_events, wait_until, ProbeOutcome, SimulatedGrbl};
use grblkit_core::{
    CommandOutcome, ControllerEvent, ControllerTrait, Coordinates, EventCategory, EventFilter,
    JobPhase, MachineState,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

fn program(lines: &[&str]) -> Vec<String> {
    lines.iter().map(|l| l.to_string()).collect()
}

fn completed(events: &[ControllerEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, ControllerEvent::JobCompleted(_)))
        .count()
}

#[tokio::test]
async fn test_connect_reports_idle() {
    let device = SimulatedGrbl::new();
    let controller = device.controller();
    let events = record_events(&controller);

    controller.connect().await.unwrap();
    assert!(controller.is_connected());
    assert!(
        wait_until(|| {
            let status = controller.get_status();
            status.state == MachineState::Idle && status.feed_rate == 0.0
        })
        .await
    );
    assert!(matches!(
        events.lock().first(),
        Some(ControllerEvent::Connected { firmware, .. }) if firmware.starts_with("Grbl 1.1h")
    ));

    controller.disconnect().await.unwrap();
    assert!(!controller.is_connected());
    assert!(matches!(
        events.lock().last(),
        Some(ControllerEvent::Disconnected)
    ));
}

#[tokio::test]
async fn test_work_position_from_offset() {
    let device = SimulatedGrbl::new();
    {
        let mut sim = device.sim.lock();
        sim.mpos = (11.0, 12.0, 13.0);
        sim.wco = (1.0, 2.0, 3.0);
    }
    let controller = device.controller();
    let reports = Arc::new(Mutex::new(0usize));
    let counter = reports.clone();
    controller.subscribe(
        EventFilter::Categories(vec![EventCategory::Status]),
        Box::new(move |_| *counter.lock() += 1),
    );

    controller.connect().await.unwrap();
    let expected = Coordinates::new(10.0, 10.0, 10.0);
    assert!(
        wait_until(|| controller
            .get_status()
            .position
            .work
            .approx_eq(&expected, 1e-6))
        .await
    );
    assert!(*reports.lock() > 0);
    controller.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_job_completes_exactly_once() {
    let device = SimulatedGrbl::new();
    let controller = device.controller();
    let events = record_events(&controller);
    controller.connect().await.unwrap();

    let started = controller
        .run_gcode_file(program(&["; square", "G21", "G0 X10", "(corner)", "G0 Y10"]))
        .await
        .unwrap();
    assert!(started);

    assert!(wait_until(|| completed(&events.lock()) > 0).await);
    // Let a few more status reports through; completion must not repeat
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(completed(&events.lock()), 1);

    let summary = controller.job_summary().unwrap();
    assert_eq!(summary.phase, JobPhase::Complete);
    assert_eq!(summary.total_lines, 5);
    assert_eq!(summary.sendable_lines, 3);
    assert_eq!(summary.resolved, 3);
    assert_eq!(summary.rejected, 0);

    let written = device.link.written_lines();
    let job_lines: Vec<&String> = written.iter().filter(|l| l.starts_with('G')).collect();
    assert_eq!(job_lines, vec!["G21", "G0 X10", "G0 Y10"]);

    controller.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_rejected_line_does_not_stop_job() {
    let device = SimulatedGrbl::new();
    device.reject("G1 X999", 9);
    let controller = device.controller();
    let events = record_events(&controller);
    controller.connect().await.unwrap();

    controller
        .run_gcode_file(program(&["G0 X1", "G1 X999", "G0 X2"]))
        .await
        .unwrap();
    assert!(wait_until(|| completed(&events.lock()) == 1).await);

    let summary = controller.job_summary().unwrap();
    assert_eq!(summary.resolved, 3);
    assert_eq!(summary.rejected, 1);
    assert!(events.lock().iter().any(|e| matches!(
        e,
        ControllerEvent::LineRejected { line, code: 9 } if line == "G1 X999"
    )));

    let status = controller.get_status();
    assert_eq!(status.error_count, 1);
    assert_eq!(status.lines_completed, 2);
    controller.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_alarm_blocks_motion_until_unlocked() {
    let device = SimulatedGrbl::new();
    let controller = device.controller();
    let events = record_events(&controller);
    controller.connect().await.unwrap();

    device.trigger_alarm(1);
    assert!(wait_until(|| controller.get_status().is_alarm_latched()).await);
    assert!(events
        .lock()
        .iter()
        .any(|e| matches!(e, ControllerEvent::Alarm(Some(code)) if code.code() == 1)));

    let err = controller.jog(5.0, 0.0, 0.0, 500.0).await.unwrap_err();
    assert!(err.is_alarm_active());
    assert!(controller
        .run_gcode_file(program(&["G0 X1"]))
        .await
        .unwrap_err()
        .is_alarm_active());

    assert!(controller.reset_alarm().await.unwrap());
    assert!(!controller.get_status().is_alarm_latched());
    assert!(wait_until(|| controller.get_status().state == MachineState::Idle).await);

    assert!(controller.jog(5.0, 0.0, 0.0, 500.0).await.unwrap());
    assert!(device
        .link
        .written_lines()
        .contains(&"$J=G91 G21 X5 F500".to_string()));
    controller.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_reset_alarm_outside_alarm_is_noop() {
    let device = SimulatedGrbl::new();
    let controller = device.controller();
    controller.connect().await.unwrap();
    assert!(!controller.reset_alarm().await.unwrap());
    assert!(!device.link.written_lines().contains(&"$X".to_string()));
    controller.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_pause_defers_completion_until_resume() {
    let device = SimulatedGrbl::new();
    device.sim.lock().defer_acks = true;
    let controller = device.controller();
    let events = record_events(&controller);
    controller.connect().await.unwrap();

    controller
        .run_gcode_file(program(&["G0 X1", "G0 X2"]))
        .await
        .unwrap();
    assert!(wait_until(|| device.link.written_lines().contains(&"G0 X2".to_string())).await);

    assert!(controller.pause_job().await.unwrap());
    assert!(device.link.realtime_bytes().contains(&b'!'));
    assert!(wait_until(|| controller.get_status().state == MachineState::Hold).await);

    device.release_acks();
    assert!(wait_until(|| controller.job_summary().is_some_and(|s| s.resolved == 2)).await);
    assert_eq!(controller.job_summary().unwrap().phase, JobPhase::Paused);
    assert_eq!(completed(&events.lock()), 0);

    assert!(controller.resume_job().await.unwrap());
    assert!(device.link.realtime_bytes().contains(&b'~'));
    assert!(wait_until(|| completed(&events.lock()) == 1).await);
    assert_eq!(controller.job_summary().unwrap().phase, JobPhase::Complete);

    controller.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_invalid_job_transitions() {
    let device = SimulatedGrbl::new();
    device.sim.lock().defer_acks = true;
    let controller = device.controller();
    controller.connect().await.unwrap();

    assert!(!controller.pause_job().await.unwrap());
    assert!(!controller.resume_job().await.unwrap());
    assert!(!controller.stop_job().await.unwrap());
    assert!(!controller
        .run_gcode_file(program(&["", "; nothing"]))
        .await
        .unwrap());

    assert!(controller.run_gcode_file(program(&["G0 X1"])).await.unwrap());
    let err = controller
        .run_gcode_file(program(&["G0 X2"]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already running"));
    // Streaming, not paused
    assert!(!controller.resume_job().await.unwrap());

    controller.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_stop_job_resets_device() {
    let device = SimulatedGrbl::new();
    device.sim.lock().defer_acks = true;
    let controller = device.controller();
    let events = record_events(&controller);
    controller.connect().await.unwrap();

    controller
        .run_gcode_file(program(&["G0 X1", "G0 X2", "G0 X3", "G0 X4", "G0 X5", "G0 X6"]))
        .await
        .unwrap();
    assert!(wait_until(|| device.link.written_lines().contains(&"G0 X1".to_string())).await);

    assert!(controller.stop_job().await.unwrap());
    assert!(device.link.realtime_bytes().contains(&0x18));
    let summary = controller.job_summary().unwrap();
    assert_eq!(summary.phase, JobPhase::Stopped);
    assert!(events
        .lock()
        .iter()
        .any(|e| matches!(e, ControllerEvent::JobStopped(_))));

    // The remaining lines are never sent
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(!device.link.written_lines().contains(&"G0 X6".to_string()));
    controller.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_home_waits_for_idle() {
    let device = SimulatedGrbl::new();
    let controller = device.controller();
    controller.connect().await.unwrap();
    assert!(controller.home().await.unwrap());
    assert!(device.link.written_lines().contains(&"$H".to_string()));
    controller.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_probe_reports_contact() {
    let device = SimulatedGrbl::new();
    let controller = device.controller();
    controller.connect().await.unwrap();

    let z = controller.probe_z(Some(50.0), 20.0).await.unwrap();
    assert!((z.unwrap() + 4.2).abs() < 1e-6);
    assert!(device
        .link
        .written_lines()
        .contains(&"G38.2 Z-20 F50".to_string()));
    controller.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_settings_dump_and_write() {
    let device = SimulatedGrbl::new();
    let controller = device.controller();
    let events = record_events(&controller);
    controller.connect().await.unwrap();

    let settings = controller.get_settings().await.unwrap();
    assert_eq!(settings.get("$110").map(String::as_str), Some("500.000"));
    assert_eq!(settings.len(), 3);

    assert!(controller.set_setting("110", "750").await.unwrap());
    assert!(device.link.written_lines().contains(&"$110=750".to_string()));
    let settings = controller.get_settings().await.unwrap();
    // The dump reports the simulator's value again
    assert_eq!(settings.get("$110").map(String::as_str), Some("500.000"));
    assert!(events.lock().iter().any(|e| matches!(
        e,
        ControllerEvent::SettingChanged { key, value } if key == "$110" && value == "750"
    )));
    controller.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_send_command_outcomes() {
    let device = SimulatedGrbl::new();
    device.reject("G99", 20);
    let controller = device.controller();
    controller.connect().await.unwrap();

    assert_eq!(
        controller.send_command("G21", true).await.unwrap(),
        CommandOutcome::Acknowledged
    );
    assert_eq!(
        controller.send_command("G99", true).await.unwrap(),
        CommandOutcome::Rejected(20)
    );
    assert_eq!(
        controller.send_command("G90", false).await.unwrap(),
        CommandOutcome::Queued
    );
    assert!(controller.send_command("  ", true).await.is_err());
    assert!(controller.send_command("G0 X1\nG0 X2", true).await.is_err());
    controller.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_overrides_and_realtime() {
    let device = SimulatedGrbl::new();
    let controller = device.controller();
    controller.connect().await.unwrap();

    controller
        .feed_override(grblkit_communication::OverrideAdjustment::CoarseUp)
        .unwrap();
    controller.jog_cancel().unwrap();
    let bytes = device.link.realtime_bytes();
    assert!(bytes.contains(&0x91));
    assert!(bytes.contains(&0x85));
    controller.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_link_loss_stops_job() {
    let device = SimulatedGrbl::new();
    device.sim.lock().defer_acks = true;
    let controller = device.controller();
    let events = record_events(&controller);
    controller.connect().await.unwrap();
    controller
        .run_gcode_file(program(&["G0 X1", "G0 X2"]))
        .await
        .unwrap();

    device.link.close();
    assert!(wait_until(|| !controller.is_connected()).await);
    assert!(events
        .lock()
        .iter()
        .any(|e| matches!(e, ControllerEvent::JobStopped(_))));
    assert_eq!(
        controller.job_summary().map(|s| s.phase),
        Some(JobPhase::Stopped)
    );

    controller.disconnect().await.unwrap();
    let disconnects = events
        .lock()
        .iter()
        .filter(|e| matches!(e, ControllerEvent::Disconnected))
        .count();
    assert_eq!(disconnects, 1);
}

#[tokio::test]
async fn test_status_before_move_is_acknowledged() {
    let device = SimulatedGrbl::new();
    device.sim.lock().defer_acks = true;
    let controller = device.controller();
    controller.connect().await.unwrap();

    let (outcome, ()) = tokio::join!(controller.send_command("G0 X10", true), async {
        assert!(wait_until(|| device.link.written_lines().contains(&"G0 X10".to_string())).await);
        device.link.push_line("<Idle|WPos:0.000,0.000,0.000|FS:0,0>");
        tokio::time::sleep(Duration::from_millis(50)).await;

        let status = controller.get_status();
        assert_eq!(status.state, MachineState::Idle);
        assert_eq!(status.position.work.x, 0.0);
        assert_eq!(status.feed_rate, 0.0);
        assert_eq!(status.spindle_speed, 0.0);
        device.release_acks();
    });
    assert_eq!(outcome.unwrap(), CommandOutcome::Acknowledged);
    controller.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_textual_error_keeps_stream_flowing() {
    let device = SimulatedGrbl::new();
    device.reject_with("G4 BAD", "error:Bad number format");
    let mut config = config();
    config.scheduler.max_in_flight_lines = 1;
    let controller = device.controller_with(config);
    controller.connect().await.unwrap();

    assert_eq!(
        controller.send_command("G4 BAD", true).await.unwrap(),
        CommandOutcome::Rejected(0)
    );
    assert_eq!(
        controller.send_command("G21", true).await.unwrap(),
        CommandOutcome::Acknowledged
    );
    assert!(device.link.written_lines().contains(&"G21".to_string()));
    controller.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_alarm_blocks_raw_motion_commands() {
    let device = SimulatedGrbl::new();
    let controller = device.controller();
    controller.connect().await.unwrap();

    device.trigger_alarm(1);
    assert!(wait_until(|| controller.get_status().is_alarm_latched()).await);

    for (line, wait) in [("$H", true), ("$J=G91 X5 F100", false), ("G0 X1", true)] {
        let err = controller.send_command(line, wait).await.unwrap_err();
        assert!(err.is_alarm_active(), "{}", line);
    }
    assert!(!device.link.written_lines().contains(&"$H".to_string()));

    // Non-motion lines still reach the device
    assert_eq!(
        controller.send_command("$$", true).await.unwrap(),
        CommandOutcome::Acknowledged
    );
    controller.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_home_ending_outside_idle_fails() {
    let device = SimulatedGrbl::new();
    device.sim.lock().home_state = "Alarm".to_string();
    let controller = device.controller();
    controller.connect().await.unwrap();

    assert!(!controller.home().await.unwrap());
    controller.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_home_times_out() {
    let device = SimulatedGrbl::new();
    device.sim.lock().home_state = "Home".to_string();
    let mut config = config();
    config.homing_timeout = Duration::from_millis(300);
    let controller = device.controller_with(config);
    controller.connect().await.unwrap();

    assert!(controller.home().await.unwrap_err().is_timeout());
    controller.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_probe_without_contact() {
    let device = SimulatedGrbl::new();
    device.sim.lock().probe_outcome = ProbeOutcome::Miss;
    let controller = device.controller();
    controller.connect().await.unwrap();

    assert_eq!(controller.probe_z(None, 20.0).await.unwrap(), None);
    controller.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_probe_ignores_pin_closed_before_cycle() {
    let device = SimulatedGrbl::new();
    device.sim.lock().probe = true;
    let controller = device.controller();
    controller.connect().await.unwrap();
    assert!(wait_until(|| controller.get_status().pins.probe).await);

    assert_eq!(controller.probe_z(Some(50.0), 20.0).await.unwrap(), None);
    assert!(wait_until(|| controller.get_status().is_alarm_latched()).await);
    controller.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_probe_times_out() {
    let device = SimulatedGrbl::new();
    device.sim.lock().probe_outcome = ProbeOutcome::Stall;
    let mut config = config();
    config.probe_timeout = Duration::from_millis(300);
    let controller = device.controller_with(config);
    controller.connect().await.unwrap();

    assert!(controller
        .probe_z(None, 20.0)
        .await
        .unwrap_err()
        .is_timeout());
    controller.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_failed_realtime_write_keeps_job_consistent() {
    let device = SimulatedGrbl::new();
    device.sim.lock().defer_acks = true;
    let controller = device.controller();
    let events = record_events(&controller);
    controller.connect().await.unwrap();
    controller
        .run_gcode_file(program(&["G0 X1", "G0 X2"]))
        .await
        .unwrap();

    device.link.refuse_byte(b'!');
    assert!(controller.pause_job().await.is_err());
    assert_eq!(
        controller.job_summary().map(|s| s.phase),
        Some(JobPhase::Streaming)
    );
    assert!(!events
        .lock()
        .iter()
        .any(|e| matches!(e, ControllerEvent::JobPaused(_))));

    device.link.refuse_byte(0x18);
    assert!(controller.stop_job().await.is_err());
    assert_eq!(
        controller.job_summary().map(|s| s.phase),
        Some(JobPhase::Stopped)
    );
    assert!(events
        .lock()
        .iter()
        .any(|e| matches!(e, ControllerEvent::JobStopped(_))));
    controller.disconnect().await.unwrap();
}
