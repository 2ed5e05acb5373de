//! Response decoder
//!
//! Runs on the reader context. Each incoming line is classified and applied
//! to the shared controller state: the status snapshot, the scheduler's
//! in-flight queue, the active job and the settings map. Events are published
//! after the locks are released, so handlers may read the controller.

use grblkit_core::{AlarmCode, ControllerEvent, ErrorCode, MachineState};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::controller::ControllerShared;
use super::response_parser::{parse_response, GrblResponse};
use super::status_parser::StatusReport;
use super::DecodeError;
use crate::communication::LineOrigin;

/// Applies device output to controller state
pub struct ResponseDecoder {
    shared: Arc<ControllerShared>,
}

impl ResponseDecoder {
    pub(crate) fn new(shared: Arc<ControllerShared>) -> Self {
        Self { shared }
    }

    /// Decode and apply one line
    pub fn handle_line(&self, line: &str) {
        tracing::debug!("<< {}", line);
        match parse_response(line) {
            Ok(None) => {}
            Ok(Some(GrblResponse::Ok)) => self.on_ack(),
            Ok(Some(GrblResponse::Error(code))) => self.on_error(code, line),
            Ok(Some(GrblResponse::Alarm(code))) => self.on_alarm(code),
            Ok(Some(GrblResponse::Status(report))) => self.on_status(report),
            Ok(Some(GrblResponse::Setting { key, value })) => {
                self.shared.settings.write().set(&key, value.clone());
                self.shared
                    .publish(vec![ControllerEvent::SettingChanged { key, value }]);
            }
            Ok(Some(GrblResponse::Message(message))) => {
                tracing::info!("Device: {}", message);
                self.shared.publish(vec![ControllerEvent::Message(message)]);
            }
            Ok(Some(GrblResponse::Welcome(banner))) => self.on_reset(banner),
            Err(e) => tracing::warn!("Failed to decode '{}': {}", line, e),
        }
    }

    fn on_ack(&self) {
        let mut events = Vec::new();
        let retired = {
            let mut stream = self.shared.stream.lock();
            let retired = stream.scheduler.acknowledge();
            if let Some(line) = &retired {
                if line.origin == LineOrigin::Job {
                    if let Some(job) = stream.job.as_mut() {
                        job.line_resolved(false);
                    }
                }
            }
            events.extend(stream.try_complete_job().map(ControllerEvent::JobCompleted));
            retired
        };

        {
            let mut status = self.shared.status.write();
            status.error = None;
            if retired.is_some() {
                status.lines_completed += 1;
            }
        }

        if retired.is_none() {
            tracing::debug!("'ok' with nothing in flight");
        }
        self.shared.writer_wake.notify_one();
        self.shared.publish(events);
    }

    fn on_error(&self, code: u8, line: &str) {
        let known = ErrorCode::from_code(code);
        match known {
            Some(error) => tracing::warn!("Device reported {}", error),
            None => tracing::error!(
                "{} ('{}')",
                DecodeError::UnknownErrorCode(code),
                line.trim()
            ),
        }

        let mut events = Vec::new();
        {
            let mut stream = self.shared.stream.lock();
            let retired = stream.scheduler.reject(code);
            if let Some(line) = &retired {
                if line.origin == LineOrigin::Job {
                    if let Some(job) = stream.job.as_mut() {
                        job.line_resolved(true);
                    }
                }
            }
            events.push(ControllerEvent::LineRejected {
                line: retired.map(|l| l.text).unwrap_or_default(),
                code,
            });
            events.extend(stream.try_complete_job().map(ControllerEvent::JobCompleted));
        }

        {
            let mut status = self.shared.status.write();
            status.error = known;
            status.error_count += 1;
        }

        self.shared.writer_wake.notify_one();
        self.shared.publish(events);
    }

    fn on_alarm(&self, code: u8) {
        let alarm = AlarmCode::from_code(code);
        match alarm {
            Some(alarm) => tracing::error!("Device raised {}", alarm),
            None => tracing::error!("{}", DecodeError::UnknownAlarmCode(code)),
        }

        let mut events = Vec::new();
        {
            // GRBL discards its line buffer when it alarms
            let mut stream = self.shared.stream.lock();
            let flushed = stream.scheduler.flush_all();
            if !flushed.is_empty() {
                tracing::warn!("Flushed {} queued lines after alarm", flushed.len());
            }
            events.extend(stream.stop_job().map(ControllerEvent::JobStopped));
        }

        {
            let mut status = self.shared.status.write();
            status.state = MachineState::Alarm;
            status.alarm = alarm;
            status.alarm_latched = true;
        }

        events.insert(0, ControllerEvent::Alarm(alarm));
        self.shared.publish(events);
    }

    fn on_status(&self, mut report: StatusReport) {
        let snapshot = {
            let mut status = self.shared.status.write();
            report.derive_positions(status.work_offset);

            status.state = report.state;
            status.sub_state = report.sub_state;
            if let Some(wco) = report.wco {
                status.work_offset = Some(wco);
            }
            if let Some(mpos) = report.mpos {
                status.position.machine = mpos;
            }
            if let Some(wpos) = report.wpos {
                status.position.work = wpos;
            }
            if let Some(feed) = report.feed_rate {
                status.feed_rate = feed;
            }
            if let Some(spindle) = report.spindle_speed {
                status.spindle_speed = spindle;
            }
            if let Some(overrides) = report.overrides {
                status.overrides = overrides;
            }
            if let Some(buffer) = report.buffer {
                status.planner_blocks_available = Some(buffer.planner_blocks);
                status.rx_bytes_available = Some(buffer.rx_bytes);
            }
            if let Some(line) = report.line_number {
                status.line_number = Some(line);
            }
            // GRBL omits Pn when no pin is active
            status.pins = report.pins.unwrap_or_default();
            status.clone()
        };
        self.shared.status_seq.fetch_add(1, Ordering::AcqRel);

        let mut events = vec![ControllerEvent::Status(snapshot)];
        {
            let mut stream = self.shared.stream.lock();
            events.extend(stream.try_complete_job().map(ControllerEvent::JobCompleted));
        }
        self.shared.publish(events);
    }

    fn on_reset(&self, banner: String) {
        tracing::info!("Device reset: {}", banner);
        let mut events = Vec::new();
        {
            let mut stream = self.shared.stream.lock();
            let flushed = stream.scheduler.flush_in_flight();
            if !flushed.is_empty() {
                tracing::warn!("Device reset dropped {} in-flight lines", flushed.len());
            }
            events.extend(stream.stop_job().map(ControllerEvent::JobStopped));
        }
        events.insert(0, ControllerEvent::Message(banner));
        self.shared.writer_wake.notify_one();
        self.shared.publish(events);
    }

    /// The reader hit a fatal I/O error
    pub(crate) fn link_lost(&self, reason: &str) {
        tracing::error!("Connection lost: {}", reason);
        let events = self.shared.enter_disconnected();
        self.shared.publish(events);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::{CommandSchedulerConfig, QueuedLine};
    use crate::firmware::grbl::job::JobStreamer;
    use grblkit_core::{CommandOutcome, Coordinates, EventFilter, JobPhase};
    use parking_lot::Mutex;

    fn setup() -> (Arc<ControllerShared>, ResponseDecoder) {
        let shared = Arc::new(ControllerShared::new(CommandSchedulerConfig::default()));
        shared.status.write().state = MachineState::Idle;
        (shared.clone(), ResponseDecoder::new(shared))
    }

    fn record(shared: &ControllerShared) -> Arc<Mutex<Vec<ControllerEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        shared
            .events
            .subscribe(EventFilter::All, move |e| sink.lock().push(e));
        seen
    }

    #[test]
    fn test_status_updates_snapshot() {
        let (shared, decoder) = setup();
        decoder.handle_line("<Run|MPos:10.000,20.000,30.000|WCO:1,2,3|FS:500,12000|Pn:P>");
        {
            let status = shared.status.read();
            assert_eq!(status.state, MachineState::Run);
            assert_eq!(status.position.work, Coordinates::new(9.0, 18.0, 27.0));
            assert_eq!(status.spindle_speed, 12000.0);
            assert!(status.pins.probe);
        }

        // WCO is remembered and Pn resets when absent
        decoder.handle_line("<Idle|MPos:5,5,5|FS:0,0>");
        let status = shared.status.read();
        assert_eq!(status.position.work, Coordinates::new(4.0, 3.0, 2.0));
        assert!(!status.pins.probe);
        assert_eq!(status.feed_rate, 0.0);
    }

    #[test]
    fn test_unknown_state_leaves_snapshot() {
        let (shared, decoder) = setup();
        decoder.handle_line("<Sleeping|MPos:1,1,1>");
        assert_eq!(shared.status.read().state, MachineState::Idle);
    }

    #[test]
    fn test_error_retires_one_line() {
        let (shared, decoder) = setup();
        let seen = record(&shared);
        let rx = {
            let mut stream = shared.stream.lock();
            let (line, rx) = QueuedLine::new("G0 X1", LineOrigin::Command, true).with_ack();
            stream.scheduler.enqueue(line).unwrap();
            stream
                .scheduler
                .enqueue(QueuedLine::new("G0 X2", LineOrigin::Command, true))
                .unwrap();
            stream.scheduler.take_sendable();
            rx
        };

        decoder.handle_line("error:9");
        assert_eq!(shared.stream.lock().scheduler.in_flight_len(), 1);
        assert_eq!(shared.status.read().error, Some(ErrorCode::SystemGcLock));
        assert_eq!(shared.status.read().error_count, 1);
        assert_eq!(rx.blocking_recv().unwrap(), CommandOutcome::Rejected(9));

        decoder.handle_line("ok");
        assert!(shared.status.read().error.is_none());
        assert!(matches!(
            seen.lock()[0],
            ControllerEvent::LineRejected { code: 9, .. }
        ));
    }

    #[test]
    fn test_unknown_error_code_still_retires() {
        let (shared, decoder) = setup();
        {
            let mut stream = shared.stream.lock();
            stream
                .scheduler
                .enqueue(QueuedLine::new("G0 X1", LineOrigin::Command, false))
                .unwrap();
            stream.scheduler.take_sendable();
        }
        decoder.handle_line("error:77");
        assert_eq!(shared.stream.lock().scheduler.in_flight_len(), 0);
        assert_eq!(shared.status.read().error, None);
    }

    #[test]
    fn test_textual_error_frees_its_slot() {
        let (shared, decoder) = setup();
        let rx = {
            let mut stream = shared.stream.lock();
            let (line, rx) = QueuedLine::new("G4 BAD", LineOrigin::Command, false).with_ack();
            stream.scheduler.enqueue(line).unwrap();
            stream.scheduler.take_sendable();
            rx
        };
        decoder.handle_line("error:Bad number format");
        assert_eq!(shared.stream.lock().scheduler.in_flight_len(), 0);
        assert_eq!(shared.status.read().error_count, 1);
        assert_eq!(rx.blocking_recv().unwrap(), CommandOutcome::Rejected(0));
    }

    #[test]
    fn test_alarm_latches_and_flushes() {
        let (shared, decoder) = setup();
        let seen = record(&shared);
        {
            let mut stream = shared.stream.lock();
            stream
                .scheduler
                .enqueue(QueuedLine::new("G0 X1", LineOrigin::Command, true))
                .unwrap();
            stream.scheduler.take_sendable();
            stream
                .scheduler
                .enqueue(QueuedLine::new("G0 X2", LineOrigin::Command, true))
                .unwrap();
        }

        decoder.handle_line("ALARM:1");
        let status = shared.status.read().clone();
        assert_eq!(status.state, MachineState::Alarm);
        assert_eq!(status.alarm, Some(AlarmCode::HardLimit));
        assert!(status.is_alarm_latched());
        assert!(shared.stream.lock().scheduler.is_idle());
        assert!(matches!(
            seen.lock()[0],
            ControllerEvent::Alarm(Some(AlarmCode::HardLimit))
        ));

        decoder.handle_line("alarm:42");
        let status = shared.status.read();
        assert!(status.alarm.is_none());
        assert!(status.is_alarm_latched());
    }

    #[test]
    fn test_job_completes_once() {
        let (shared, decoder) = setup();
        let seen = record(&shared);
        {
            let mut stream = shared.stream.lock();
            let mut job = JobStreamer::new(vec!["G0 X1".into()]).unwrap();
            job.feed(&mut stream.scheduler, 4);
            stream.job = Some(job);
            stream.scheduler.take_sendable();
        }

        decoder.handle_line("ok");
        decoder.handle_line("<Idle|MPos:0,0,0>");
        decoder.handle_line("ok");

        let completions = seen
            .lock()
            .iter()
            .filter(|e| matches!(e, ControllerEvent::JobCompleted(_)))
            .count();
        assert_eq!(completions, 1);
        let stream = shared.stream.lock();
        assert!(stream.job.is_none());
        assert_eq!(
            stream.last_job.as_ref().map(|j| j.phase),
            Some(JobPhase::Complete)
        );
    }

    #[test]
    fn test_settings_and_banner() {
        let (shared, decoder) = setup();
        decoder.handle_line("$110=500.000");
        assert_eq!(shared.settings.read().get("$110"), Some("500.000"));

        {
            let mut stream = shared.stream.lock();
            stream
                .scheduler
                .enqueue(QueuedLine::new("G4 P1", LineOrigin::Command, false))
                .unwrap();
            stream.scheduler.take_sendable();
        }
        decoder.handle_line("Grbl 1.1h ['$' for help]");
        assert_eq!(shared.stream.lock().scheduler.in_flight_len(), 0);
    }
}
