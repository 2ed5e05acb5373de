//! Simulated GRBL device shared by the integration tests
#![allow(dead_code)]

use grblkit_communication::{
    ConnectionParams, ControllerConfig, GrblController, HandshakeConfig, MockConnector,
    MockInput, MockLink,
};
use grblkit_core::{ControllerEvent, ControllerTrait, EventFilter};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const BANNER: &str = "Grbl 1.1h ['$' for help]";

/// How the simulated probe cycle ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The pin closes at Z -4.2
    Contact,
    /// The cycle runs out of travel and the machine returns to Idle
    Miss,
    /// The cycle never finishes
    Stall,
}

/// Device-side state of the simulator
#[derive(Debug)]
pub struct SimState {
    pub state: String,
    pub mpos: (f64, f64, f64),
    pub wco: (f64, f64, f64),
    pub probe: bool,
    pub probe_outcome: ProbeOutcome,
    /// State the machine settles in after `$H`
    pub home_state: String,
    /// Lines answered with an `error:` reply instead of `ok`
    pub rejects: Vec<(String, String)>,
    /// Hold back `ok`s until `release_acks`
    pub defer_acks: bool,
    pub deferred: usize,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            state: "Idle".to_string(),
            mpos: (0.0, 0.0, 0.0),
            wco: (0.0, 0.0, 0.0),
            probe: false,
            probe_outcome: ProbeOutcome::Contact,
            home_state: "Idle".to_string(),
            rejects: Vec::new(),
            defer_acks: false,
            deferred: 0,
        }
    }
}

impl SimState {
    fn report(&self) -> String {
        let (mx, my, mz) = self.mpos;
        let (ox, oy, oz) = self.wco;
        let mut report = format!(
            "<{}|MPos:{:.3},{:.3},{:.3}|FS:0,0|WCO:{:.3},{:.3},{:.3}",
            self.state, mx, my, mz, ox, oy, oz
        );
        if self.probe {
            report.push_str("|Pn:P");
        }
        report.push('>');
        report
    }

    fn ok(&mut self) -> Vec<String> {
        if self.defer_acks {
            self.deferred += 1;
            Vec::new()
        } else {
            vec!["ok".to_string()]
        }
    }

    fn answer(&mut self, line: &str) -> Vec<String> {
        if let Some((_, reply)) = self.rejects.iter().find(|(l, _)| l == line) {
            return vec![reply.clone()];
        }
        if self.state == "Alarm" {
            return match line {
                "$X" => {
                    self.state = "Idle".to_string();
                    vec!["[MSG:Caution: Unlocked]".to_string(), "ok".to_string()]
                }
                l if l.is_empty() || l.starts_with('$') => vec!["ok".to_string()],
                _ => vec!["error:9".to_string()],
            };
        }
        match line {
            "" => vec!["ok".to_string()],
            "$$" => vec![
                "$0=10".to_string(),
                "$1=25".to_string(),
                "$110=500.000".to_string(),
                "ok".to_string(),
            ],
            "$H" => {
                self.state = self.home_state.clone();
                vec!["ok".to_string()]
            }
            l if l.starts_with('$') => vec!["ok".to_string()],
            l if l.starts_with("G38.2") => self.probe_cycle(),
            _ => self.ok(),
        }
    }

    fn probe_cycle(&mut self) -> Vec<String> {
        if self.probe {
            // GRBL refuses to probe with the pin already closed
            self.state = "Alarm".to_string();
            return vec!["ALARM:4".to_string()];
        }
        match self.probe_outcome {
            ProbeOutcome::Contact => {
                self.probe = true;
                self.mpos.2 = -4.2;
                vec!["[PRB:0.000,0.000,-4.200:1]".to_string(), "ok".to_string()]
            }
            ProbeOutcome::Miss => {
                self.mpos.2 = -20.0;
                vec!["[PRB:0.000,0.000,-20.000:0]".to_string(), "ok".to_string()]
            }
            ProbeOutcome::Stall => {
                self.state = "Run".to_string();
                Vec::new()
            }
        }
    }

    fn realtime(&mut self, byte: u8) -> Vec<String> {
        match byte {
            b'?' => vec![self.report()],
            b'!' if self.state != "Alarm" => {
                self.state = "Hold:0".to_string();
                Vec::new()
            }
            b'~' if self.state.starts_with("Hold") => {
                self.state = "Idle".to_string();
                Vec::new()
            }
            0x18 => {
                self.deferred = 0;
                if self.state != "Alarm" {
                    self.state = "Idle".to_string();
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }
}

/// A `MockLink` answering like GRBL 1.1
#[derive(Clone)]
pub struct SimulatedGrbl {
    pub link: MockLink,
    pub sim: Arc<Mutex<SimState>>,
}

impl SimulatedGrbl {
    pub fn new() -> Self {
        let link = MockLink::new("sim").with_banner(BANNER);
        let sim = Arc::new(Mutex::new(SimState::default()));
        let device = sim.clone();
        link.set_responder(move |input| {
            let mut state = device.lock();
            match input {
                MockInput::Line(line) => state.answer(line),
                MockInput::Realtime(byte) => state.realtime(byte),
            }
        });
        Self { link, sim }
    }

    pub fn reject(&self, line: &str, code: u8) {
        self.reject_with(line, &format!("error:{}", code));
    }

    pub fn reject_with(&self, line: &str, reply: &str) {
        self.sim
            .lock()
            .rejects
            .push((line.to_string(), reply.to_string()));
    }

    pub fn trigger_alarm(&self, code: u8) {
        self.sim.lock().state = "Alarm".to_string();
        self.link.push_line(&format!("ALARM:{}", code));
    }

    /// Send every `ok` held back so far
    pub fn release_acks(&self) {
        let count = {
            let mut sim = self.sim.lock();
            sim.defer_acks = false;
            std::mem::take(&mut sim.deferred)
        };
        for _ in 0..count {
            self.link.push_line("ok");
        }
    }

    pub fn controller(&self) -> GrblController {
        self.controller_with(config())
    }

    pub fn controller_with(&self, config: ControllerConfig) -> GrblController {
        GrblController::with_connector(config, Arc::new(MockConnector::new(self.link.clone())))
    }
}

pub fn config() -> ControllerConfig {
    ControllerConfig {
        connection: ConnectionParams::new("sim"),
        poll_interval: Duration::from_millis(20),
        command_timeout: Duration::from_millis(500),
        homing_timeout: Duration::from_secs(2),
        probe_timeout: Duration::from_secs(2),
        handshake: HandshakeConfig {
            signature: "Grbl".to_string(),
            settle: Duration::from_millis(1),
            timeout: Duration::from_millis(500),
        },
        join_timeout: Duration::from_millis(500),
        ..Default::default()
    }
}

/// Poll `condition` until it holds or two seconds pass
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Collect every event the controller publishes
pub fn record_events(controller: &GrblController) -> Arc<Mutex<Vec<ControllerEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    controller.subscribe(
        EventFilter::All,
        Box::new(move |event| sink.lock().push(event)),
    );
    seen
}
