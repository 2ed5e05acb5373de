//! GRBL Controller Implementation
//!
//! Provides the [`ControllerTrait`] implementation for GRBL firmware:
//! connection management, the three execution contexts and the facade
//! operations.
//!
//! # Execution contexts
//! - **Reader** (blocking task): frames lines off the link and hands them to
//!   the [`ResponseDecoder`].
//! - **Writer** (async task): tops up the scheduler from the active job and
//!   writes whatever the flow-control threshold allows. Woken by a `Notify`
//!   or a short tick.
//! - **Poller** (async task): writes `?` on a fixed interval.
//!
//! They share the status snapshot, the stream state (scheduler and job under
//! one mutex), the settings map and the event bus. No code path holds the
//! status lock and the stream lock at the same time.

use async_trait::async_trait;
use grblkit_core::{
    CommandOutcome, ConnectionError, ControllerError, ControllerEvent, ControllerTrait,
    EventBus, EventFilter, JobSummary, MachineState, Result, StatusSnapshot, SubscriptionId,
};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;

use super::decoder::ResponseDecoder;
use super::job::JobStreamer;
use super::realtime::{OverrideAdjustment, RealtimeCommand};
use super::utils;
use crate::communication::transport::{write_line, write_realtime, Handshake};
use crate::communication::{
    handshake, CommandScheduler, CommandSchedulerConfig, ConnectionParams, Connector,
    HandshakeConfig, LineOrigin, LineReader, QueuedLine, SerialConnector, SharedLink,
};
use crate::firmware::settings::DeviceSettings;

const WRITER_TICK: Duration = Duration::from_millis(10);
const WAIT_TICK: Duration = Duration::from_millis(10);

/// Tunables for one controller
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Serial parameters
    pub connection: ConnectionParams,
    /// Status poll interval; zero disables polling
    pub poll_interval: Duration,
    /// Flow control and queue limits
    pub scheduler: CommandSchedulerConfig,
    /// Wait for an ordinary acknowledgment
    pub command_timeout: Duration,
    /// Wait for a homing cycle
    pub homing_timeout: Duration,
    /// Wait for a probe cycle
    pub probe_timeout: Duration,
    /// Reset, settle and banner detection
    pub handshake: HandshakeConfig,
    /// Upper bound accepted by `set_spindle`
    pub max_spindle_rpm: f64,
    /// Feed used by `probe_z` when none is given
    pub probe_feed: f64,
    /// How long `disconnect` waits for each worker
    pub join_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionParams::default(),
            poll_interval: Duration::from_millis(100),
            scheduler: CommandSchedulerConfig::default(),
            command_timeout: Duration::from_secs(5),
            homing_timeout: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(30),
            handshake: HandshakeConfig::default(),
            max_spindle_rpm: 24000.0,
            probe_feed: 100.0,
            join_timeout: Duration::from_secs(1),
        }
    }
}

/// Scheduler and job, guarded together
#[derive(Debug)]
pub(crate) struct StreamState {
    pub(crate) scheduler: CommandScheduler,
    pub(crate) job: Option<JobStreamer>,
    pub(crate) last_job: Option<JobSummary>,
}

impl StreamState {
    /// Finish the job if every line is resolved while streaming
    pub(crate) fn try_complete_job(&mut self) -> Option<JobSummary> {
        let summary = self.job.as_mut()?.try_complete()?;
        tracing::info!(
            "Job {} complete: {} lines, {} rejected",
            summary.id,
            summary.resolved,
            summary.rejected
        );
        self.job = None;
        self.last_job = Some(summary.clone());
        Some(summary)
    }

    /// Abort the active job, if any
    pub(crate) fn stop_job(&mut self) -> Option<JobSummary> {
        let summary = self.job.take()?.stop();
        tracing::info!("Job {} stopped after {} lines", summary.id, summary.resolved);
        self.last_job = Some(summary.clone());
        Some(summary)
    }
}

/// State shared between the facade and the execution contexts
pub(crate) struct ControllerShared {
    pub(crate) status: RwLock<StatusSnapshot>,
    /// Bumped after every applied status report
    pub(crate) status_seq: AtomicU64,
    pub(crate) stream: Mutex<StreamState>,
    pub(crate) settings: RwLock<DeviceSettings>,
    pub(crate) events: EventBus,
    pub(crate) writer_wake: Notify,
}

impl ControllerShared {
    pub(crate) fn new(scheduler: CommandSchedulerConfig) -> Self {
        Self {
            status: RwLock::new(StatusSnapshot::disconnected()),
            status_seq: AtomicU64::new(0),
            stream: Mutex::new(StreamState {
                scheduler: CommandScheduler::new(scheduler),
                job: None,
                last_job: None,
            }),
            settings: RwLock::new(DeviceSettings::new()),
            events: EventBus::new(),
            writer_wake: Notify::new(),
        }
    }

    pub(crate) fn publish(&self, events: Vec<ControllerEvent>) {
        for event in events {
            tracing::trace!("Event: {}", event.description());
            self.events.publish(event);
        }
    }

    /// Drop queues and job and mark the link down.
    ///
    /// Returns the events to publish; empty if already disconnected.
    pub(crate) fn enter_disconnected(&self) -> Vec<ControllerEvent> {
        let mut events = Vec::new();
        {
            let mut stream = self.stream.lock();
            stream.scheduler.flush_all();
            events.extend(stream.stop_job().map(ControllerEvent::JobStopped));
        }
        let was_connected = {
            let mut status = self.status.write();
            let was_connected = status.state.is_connected();
            *status = StatusSnapshot::disconnected();
            was_connected
        };
        if was_connected {
            events.push(ControllerEvent::Disconnected);
        }
        events
    }
}

/// A live connection and its workers
struct Session {
    port: String,
    link: SharedLink,
    stop: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    poller: Option<JoinHandle<()>>,
}

/// GRBL Controller implementation
pub struct GrblController {
    name: String,
    config: ControllerConfig,
    connector: Arc<dyn Connector>,
    shared: Arc<ControllerShared>,
    /// Write half of the link while connected
    link: RwLock<Option<SharedLink>>,
    /// Serializes connect and disconnect
    session: tokio::sync::Mutex<Option<Session>>,
}

impl GrblController {
    /// Create a controller that opens hardware serial ports
    pub fn new(config: ControllerConfig) -> Self {
        Self::with_connector(config, Arc::new(SerialConnector))
    }

    /// Create a controller that obtains its link from `connector`
    pub fn with_connector(config: ControllerConfig, connector: Arc<dyn Connector>) -> Self {
        let name = if config.connection.port.is_empty() {
            "GRBL".to_string()
        } else {
            format!("GRBL@{}", config.connection.port)
        };
        Self {
            name,
            shared: Arc::new(ControllerShared::new(config.scheduler.clone())),
            config,
            connector,
            link: RwLock::new(None),
            session: tokio::sync::Mutex::new(None),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// The event bus, for async receivers
    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    /// Write a real-time byte, bypassing the queue
    pub fn send_realtime(&self, command: RealtimeCommand) -> Result<()> {
        let link = self
            .link
            .read()
            .clone()
            .ok_or(ControllerError::NotConnected)?;
        tracing::debug!(">> realtime {:?} (0x{:02X})", command, command.byte());
        write_realtime(&link, command.byte())?;
        Ok(())
    }

    /// Adjust the feed override
    pub fn feed_override(&self, adjustment: OverrideAdjustment) -> Result<()> {
        self.send_realtime(adjustment.feed())
    }

    /// Adjust the spindle override
    pub fn spindle_override(&self, adjustment: OverrideAdjustment) -> Result<()> {
        self.send_realtime(adjustment.spindle())
    }

    /// Cancel an active jog
    pub fn jog_cancel(&self) -> Result<()> {
        self.send_realtime(RealtimeCommand::JogCancel)
    }

    /// Soft reset: stops motion and discards every queued line and the job
    pub fn soft_reset(&self) -> Result<()> {
        self.send_realtime(RealtimeCommand::Reset)?;
        let events: Vec<ControllerEvent> = {
            let mut stream = self.shared.stream.lock();
            stream.scheduler.flush_all();
            stream.stop_job().map(ControllerEvent::JobStopped).into_iter().collect()
        };
        self.shared.publish(events);
        Ok(())
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ControllerError::NotConnected.into())
        }
    }

    fn ensure_no_alarm(&self) -> Result<()> {
        let status = self.shared.status.read();
        if status.is_alarm_latched() {
            return Err(ControllerError::AlarmActive { code: status.alarm }.into());
        }
        Ok(())
    }

    /// Queue a line from the facade and return its acknowledgment receiver
    fn enqueue(&self, text: String, motion: bool) -> Result<oneshot::Receiver<CommandOutcome>> {
        self.ensure_connected()?;
        let (line, ack) = QueuedLine::new(text, LineOrigin::Command, motion).with_ack();
        if line.motion {
            self.ensure_no_alarm()?;
        }
        self.shared.stream.lock().scheduler.enqueue(line)?;
        self.shared.writer_wake.notify_one();
        Ok(ack)
    }

    /// Queue a line and wait for its answer
    async fn submit(&self, text: String, motion: bool, timeout: Duration) -> Result<CommandOutcome> {
        let ack = self.enqueue(text.clone(), motion)?;
        match tokio::time::timeout(timeout, ack).await {
            Ok(Ok(outcome)) => {
                tracing::debug!("'{}' -> {}", text, outcome);
                Ok(outcome)
            }
            // The scheduler dropped the line without resolving it
            Ok(Err(_)) => Ok(CommandOutcome::Flushed),
            Err(_) => {
                tracing::warn!("'{}' not acknowledged within {:?}", text, timeout);
                Err(ControllerError::CommandTimeout {
                    command: text,
                    timeout_ms: timeout.as_millis() as u64,
                }
                .into())
            }
        }
    }

    fn status_seq(&self) -> u64 {
        self.shared.status_seq.load(Ordering::Acquire)
    }

    /// Wait for a status report newer than `after` that satisfies `done`
    async fn wait_for_status<F>(&self, after: u64, deadline: Instant, done: F) -> Option<StatusSnapshot>
    where
        F: Fn(&StatusSnapshot) -> bool,
    {
        loop {
            if self.status_seq() > after {
                let snapshot = self.get_status();
                if done(&snapshot) || !snapshot.state.is_connected() {
                    return Some(snapshot);
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(WAIT_TICK).await;
        }
    }

    fn spawn_workers(&self, session: Handshake) -> Session {
        let stop = Arc::new(AtomicBool::new(false));
        let link: SharedLink = Arc::new(Mutex::new(session.writer));
        let decoder = ResponseDecoder::new(self.shared.clone());

        for line in &session.trailing {
            decoder.handle_line(line);
        }

        let port = session.reader.name().to_string();
        let reader = {
            let stop = stop.clone();
            let reader = session.reader;
            tokio::task::spawn_blocking(move || reader_loop(reader, decoder, stop))
        };
        let writer = tokio::spawn(writer_loop(
            self.shared.clone(),
            link.clone(),
            stop.clone(),
            self.config.scheduler.max_in_flight_lines,
        ));
        let poller = (!self.config.poll_interval.is_zero()).then(|| {
            tokio::spawn(poll_loop(
                self.shared.clone(),
                link.clone(),
                stop.clone(),
                self.config.poll_interval,
            ))
        });

        Session {
            port,
            link,
            stop,
            reader,
            writer,
            poller,
        }
    }

    async fn teardown(&self, session: Session) {
        session.stop.store(true, Ordering::Release);
        self.shared.writer_wake.notify_one();
        *self.link.write() = None;

        let join_timeout = self.config.join_timeout;
        let mut workers = vec![("reader", session.reader), ("writer", session.writer)];
        workers.extend(session.poller.map(|p| ("poller", p)));
        for (name, handle) in workers {
            let abort = handle.abort_handle();
            match tokio::time::timeout(join_timeout, handle).await {
                Ok(Ok(())) => tracing::debug!("{} worker stopped", name),
                Ok(Err(e)) => tracing::error!("{} worker failed: {}", name, e),
                Err(_) => {
                    tracing::error!(
                        "{} worker did not stop within {:?}; it ignored the stop flag",
                        name,
                        join_timeout
                    );
                    abort.abort();
                }
            }
        }

        let events = self.shared.enter_disconnected();
        self.shared.publish(events);
        tracing::info!("Disconnected from {}", session.port);
    }
}

fn reader_loop(mut reader: LineReader, decoder: ResponseDecoder, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Acquire) {
        match reader.read_line() {
            Ok(Some(line)) => decoder.handle_line(&line),
            Ok(None) => {}
            Err(e) => {
                if !stop.swap(true, Ordering::AcqRel) {
                    decoder.link_lost(&format!("read from {} failed: {}", reader.name(), e));
                }
                break;
            }
        }
    }
    tracing::debug!("Reader stopped");
}

async fn writer_loop(
    shared: Arc<ControllerShared>,
    link: SharedLink,
    stop: Arc<AtomicBool>,
    max_job_pending: usize,
) {
    while !stop.load(Ordering::Acquire) {
        let alarm = shared.status.read().is_alarm_latched();
        let lines = {
            let mut stream = shared.stream.lock();
            let StreamState { scheduler, job, .. } = &mut *stream;
            if let (false, Some(job)) = (alarm, job.as_mut()) {
                job.feed(scheduler, max_job_pending);
            }
            scheduler.take_sendable()
        };

        for line in lines {
            tracing::debug!(">> {}", line);
            if let Err(e) = write_line(&link, &line) {
                if !stop.swap(true, Ordering::AcqRel) {
                    tracing::error!("Connection lost: write failed: {}", e);
                    let events = shared.enter_disconnected();
                    shared.publish(events);
                }
                return;
            }
        }

        tokio::select! {
            _ = shared.writer_wake.notified() => {}
            _ = tokio::time::sleep(WRITER_TICK) => {}
        }
    }
    tracing::debug!("Writer stopped");
}

async fn poll_loop(
    shared: Arc<ControllerShared>,
    link: SharedLink,
    stop: Arc<AtomicBool>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if stop.load(Ordering::Acquire) {
            break;
        }
        if let Err(e) = write_realtime(&link, RealtimeCommand::StatusReport.byte()) {
            if !stop.swap(true, Ordering::AcqRel) {
                tracing::error!("Connection lost: status poll failed: {}", e);
                let events = shared.enter_disconnected();
                shared.publish(events);
            }
            break;
        }
    }
    tracing::debug!("Poller stopped");
}

#[async_trait]
impl ControllerTrait for GrblController {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if let Some(existing) = session.take() {
            if !existing.stop.load(Ordering::Acquire) {
                *session = Some(existing);
                return Err(ControllerError::AlreadyConnected.into());
            }
            // The link died underneath us; reap the old workers first
            self.teardown(existing).await;
        }

        tracing::info!("Connecting to {}", self.config.connection.port);
        let connector = self.connector.clone();
        let params = self.config.connection.clone();
        let handshake_config = self.config.handshake.clone();
        let opened = tokio::task::spawn_blocking(move || {
            handshake(connector.as_ref(), &params, &handshake_config)
        })
        .await
        .map_err(|e| ConnectionError::SerialError {
            reason: format!("handshake task failed: {}", e),
        })??;

        let banner = opened.banner.clone();
        {
            let mut stream = self.shared.stream.lock();
            stream.scheduler.flush_all();
            stream.job = None;
        }
        self.shared.settings.write().clear();
        {
            let mut status = self.shared.status.write();
            *status = StatusSnapshot::disconnected();
            status.state = MachineState::Idle;
        }

        self.shared.publish(vec![ControllerEvent::Connected {
            port: opened.reader.name().to_string(),
            firmware: banner,
        }]);

        let started = self.spawn_workers(opened);
        *self.link.write() = Some(started.link.clone());
        *session = Some(started);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        match session.take() {
            Some(existing) => self.teardown(existing).await,
            None => tracing::debug!("Disconnect while not connected"),
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.status.read().state.is_connected()
    }

    fn get_status(&self) -> StatusSnapshot {
        self.shared.status.read().clone()
    }

    async fn send_command(&self, line: &str, wait_for_ack: bool) -> Result<CommandOutcome> {
        let line = line.trim();
        if line.is_empty() || line.contains('\n') {
            return Err(ControllerError::InvalidArgument {
                reason: "a command must be exactly one non-empty line".to_string(),
            }
            .into());
        }
        let motion = utils::is_motion_command(line);
        if !wait_for_ack {
            self.enqueue(line.to_string(), motion)?;
            return Ok(CommandOutcome::Queued);
        }
        self.submit(line.to_string(), motion, self.config.command_timeout)
            .await
    }

    async fn home(&self) -> Result<bool> {
        let timeout = self.config.homing_timeout;
        let deadline = Instant::now() + timeout;
        let outcome = self.submit("$H".to_string(), true, timeout).await?;
        if !outcome.is_accepted() {
            tracing::warn!("Homing refused: {}", outcome);
            return Ok(false);
        }

        let after = self.status_seq();
        match self
            .wait_for_status(after, deadline, |s| s.state != MachineState::Home)
            .await
        {
            Some(status) => {
                tracing::info!("Homing finished in state {}", status.state);
                Ok(status.state == MachineState::Idle)
            }
            None => Err(ControllerError::CommandTimeout {
                command: "$H".to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }
            .into()),
        }
    }

    async fn jog(&self, dx: f64, dy: f64, dz: f64, feed: f64) -> Result<bool> {
        self.ensure_connected()?;
        self.ensure_no_alarm()?;
        let command = utils::jog_command(dx, dy, dz, feed).ok_or_else(|| {
            ControllerError::InvalidArgument {
                reason: "jog needs at least one non-zero axis".to_string(),
            }
        })?;
        let outcome = self.submit(command, true, self.config.command_timeout).await?;
        Ok(outcome.is_accepted())
    }

    async fn move_to(
        &self,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        feed: f64,
    ) -> Result<bool> {
        self.ensure_connected()?;
        self.ensure_no_alarm()?;
        let command = utils::move_command(x, y, z, feed).ok_or_else(|| {
            ControllerError::InvalidArgument {
                reason: "move needs at least one axis".to_string(),
            }
        })?;
        let outcome = self.submit(command, true, self.config.command_timeout).await?;
        Ok(outcome.is_accepted())
    }

    async fn set_spindle(&self, rpm: f64, clockwise: bool) -> Result<bool> {
        self.ensure_connected()?;
        self.ensure_no_alarm()?;
        if rpm < 0.0 {
            return Err(ControllerError::InvalidArgument {
                reason: format!("spindle speed {} is negative", rpm),
            }
            .into());
        }
        if rpm > self.config.max_spindle_rpm {
            return Err(ControllerError::OutOfRange {
                what: "Spindle speed".to_string(),
                value: rpm,
                max: self.config.max_spindle_rpm,
            }
            .into());
        }
        let command = utils::spindle_command(rpm, clockwise);
        let outcome = self.submit(command, true, self.config.command_timeout).await?;
        Ok(outcome.is_accepted())
    }

    async fn probe_z(&self, feed: Option<f64>, max_distance: f64) -> Result<Option<f64>> {
        self.ensure_connected()?;
        self.ensure_no_alarm()?;
        if max_distance <= 0.0 {
            return Err(ControllerError::InvalidArgument {
                reason: "probe distance must be positive".to_string(),
            }
            .into());
        }

        let command = utils::probe_command(feed.unwrap_or(self.config.probe_feed), max_distance);
        let timeout = self.config.probe_timeout;
        let deadline = Instant::now() + timeout;
        let started = self.status_seq();
        // Contact means the pin closes during the cycle, not that it was closed already
        let mut pin_opened = !self.get_status().pins.probe;
        let mut ack = Some(self.enqueue(command.clone(), true)?);
        let mut acked_at: Option<u64> = None;

        loop {
            let seq = self.status_seq();
            let status = self.get_status();
            if !status.state.is_connected() {
                return Err(ControllerError::NotConnected.into());
            }
            if seq > started {
                if status.pins.probe && pin_opened {
                    tracing::info!("Probe triggered at Z {:.3}", status.position.work.z);
                    return Ok(Some(status.position.work.z));
                }
                pin_opened |= !status.pins.probe;
            }
            if status.is_alarm_latched() {
                tracing::warn!("Probe cycle alarmed");
                return Ok(None);
            }
            if acked_at.is_some_and(|at| seq > at) && status.state == MachineState::Idle {
                tracing::info!("Probe finished without contact");
                return Ok(None);
            }
            if Instant::now() >= deadline {
                return Err(ControllerError::CommandTimeout {
                    command,
                    timeout_ms: timeout.as_millis() as u64,
                }
                .into());
            }

            match ack.as_mut() {
                Some(rx) => match tokio::time::timeout(WAIT_TICK, rx).await {
                    Ok(Ok(CommandOutcome::Acknowledged)) => {
                        ack = None;
                        acked_at = Some(self.status_seq());
                    }
                    Ok(Ok(outcome)) => {
                        tracing::warn!("Probe refused: {}", outcome);
                        return Ok(None);
                    }
                    Ok(Err(_)) => return Ok(None),
                    Err(_) => {}
                },
                None => tokio::time::sleep(WAIT_TICK).await,
            }
        }
    }

    async fn reset_alarm(&self) -> Result<bool> {
        self.ensure_connected()?;
        let state = self.shared.status.read().state;
        if state != MachineState::Alarm {
            tracing::warn!("reset_alarm ignored in state {}", state);
            return Ok(false);
        }

        let outcome = self
            .submit("$X".to_string(), false, self.config.command_timeout)
            .await?;
        if !outcome.is_accepted() {
            tracing::warn!("Unlock refused: {}", outcome);
            return Ok(false);
        }

        let mut status = self.shared.status.write();
        status.alarm = None;
        status.alarm_latched = false;
        tracing::info!("Alarm cleared");
        Ok(true)
    }

    async fn get_settings(&self) -> Result<BTreeMap<String, String>> {
        let outcome = self
            .submit("$$".to_string(), false, self.config.command_timeout)
            .await?;
        if !outcome.is_accepted() {
            tracing::warn!("Settings dump refused: {}", outcome);
        }
        Ok(self.shared.settings.read().to_map())
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<bool> {
        let key = utils::normalize_setting_key(key);
        if key.len() < 2 || value.trim().is_empty() {
            return Err(ControllerError::InvalidArgument {
                reason: format!("invalid setting {}={}", key, value),
            }
            .into());
        }
        let outcome = self
            .submit(
                utils::setting_command(&key, value),
                false,
                self.config.command_timeout,
            )
            .await?;
        if !outcome.is_accepted() {
            return Ok(false);
        }

        let value = value.trim().to_string();
        self.shared.settings.write().set(&key, value.clone());
        self.shared
            .publish(vec![ControllerEvent::SettingChanged { key, value }]);
        Ok(true)
    }

    async fn run_gcode_file(&self, lines: Vec<String>) -> Result<bool> {
        self.ensure_connected()?;
        self.ensure_no_alarm()?;
        let state = self.shared.status.read().state;

        let summary = {
            let mut stream = self.shared.stream.lock();
            if stream.job.is_some() {
                return Err(ControllerError::AlreadyRunning.into());
            }
            if state != MachineState::Idle {
                return Err(ControllerError::MachineNotReady { state }.into());
            }
            let Some(job) = JobStreamer::new(lines) else {
                tracing::info!("Program has no sendable lines");
                return Ok(false);
            };
            let summary = job.summary().clone();
            stream.job = Some(job);
            summary
        };

        tracing::info!(
            "Job {} started: {} of {} lines sendable",
            summary.id,
            summary.sendable_lines,
            summary.total_lines
        );
        self.shared.writer_wake.notify_one();
        self.shared.publish(vec![ControllerEvent::JobStarted(summary)]);
        Ok(true)
    }

    async fn pause_job(&self) -> Result<bool> {
        self.ensure_connected()?;
        let summary = {
            let mut stream = self.shared.stream.lock();
            let Some(job) = stream.job.as_mut() else {
                tracing::warn!("pause_job with no active job");
                return Ok(false);
            };
            if !job.pause() {
                tracing::warn!("pause_job ignored in phase {}", job.phase());
                return Ok(false);
            }
            job.summary().clone()
        };
        if let Err(e) = self.send_realtime(RealtimeCommand::FeedHold) {
            // The hold never reached the device
            if let Some(job) = self.shared.stream.lock().job.as_mut() {
                job.resume();
            }
            return Err(e);
        }
        self.shared.publish(vec![ControllerEvent::JobPaused(summary)]);
        Ok(true)
    }

    async fn resume_job(&self) -> Result<bool> {
        self.ensure_connected()?;
        let state = self.shared.status.read().state;
        let summary = {
            let mut stream = self.shared.stream.lock();
            let Some(job) = stream.job.as_mut() else {
                tracing::warn!("resume_job with no active job");
                return Ok(false);
            };
            if state != MachineState::Hold || !job.resume() {
                tracing::warn!(
                    "resume_job ignored in state {} phase {}",
                    state,
                    job.phase()
                );
                return Ok(false);
            }
            job.summary().clone()
        };
        if let Err(e) = self.send_realtime(RealtimeCommand::CycleStart) {
            if let Some(job) = self.shared.stream.lock().job.as_mut() {
                job.pause();
            }
            return Err(e);
        }
        self.shared.writer_wake.notify_one();
        self.shared.publish(vec![ControllerEvent::JobResumed(summary)]);
        Ok(true)
    }

    async fn stop_job(&self) -> Result<bool> {
        self.ensure_connected()?;
        let summary = {
            let mut stream = self.shared.stream.lock();
            let Some(summary) = stream.stop_job() else {
                tracing::warn!("stop_job with no active job");
                return Ok(false);
            };
            stream.scheduler.flush_all();
            summary
        };
        // The job is gone locally even if the reset cannot be written
        let reset = self.send_realtime(RealtimeCommand::Reset);
        self.shared.publish(vec![ControllerEvent::JobStopped(summary)]);
        reset.map(|()| true)
    }

    fn job_summary(&self) -> Option<JobSummary> {
        let stream = self.shared.stream.lock();
        stream
            .job
            .as_ref()
            .map(|job| job.summary().clone())
            .or_else(|| stream.last_job.clone())
    }

    fn subscribe(
        &self,
        filter: EventFilter,
        handler: Box<dyn Fn(ControllerEvent) + Send + Sync>,
    ) -> SubscriptionId {
        self.shared.events.subscribe(filter, handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.events.unsubscribe(id)
    }
}

impl std::fmt::Debug for GrblController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrblController")
            .field("name", &self.name)
            .field("state", &self.shared.status.read().state)
            .finish()
    }
}
