//! Update controller - the check/download/validate/commit state machine
//!
//! One controller runs on one dedicated thread. Every cycle walks
//!
//! ```text
//! Idle → SessionOpen → DescriptorCompared → Skipped   ─┐
//!                                         → Streaming → Completed / Failed → Idle
//! ```
//!
//! and always ends back in `Idle`. Cycles never overlap: the only driver is
//! the loop in [`UpdateController::run`].

use std::time::Duration;

use serde::Serialize;

use crate::boot::{BootSelector, Restart};
use crate::config::OtaConfig;
use crate::connectivity::{ConnectivityProvider, LinkMonitor};
use crate::decision::{decide, Decision};
use crate::transfer::{progress_percent, PullStatus, SessionGuard, TransferSession, Transport};
use crate::version::VersionDescriptor;

/// Result of one check cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UpdateOutcome {
    NoUpdateAvailable,
    UpdateAppliedPendingRestart,
    TransferFailed,
    ValidationFailed,
    ConnectivityUnavailable,
    CommitFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    SessionOpen,
    DescriptorCompared,
    Skipped,
    Streaming,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleStats {
    pub cycles: u64,
    pub no_update: u64,
    pub applied: u64,
    pub transfer_failed: u64,
    pub validation_failed: u64,
    pub connectivity_unavailable: u64,
    pub commit_failed: u64,
    pub last_outcome: Option<UpdateOutcome>,
    pub last_bytes: u64,
}

impl CycleStats {
    fn record(&mut self, outcome: UpdateOutcome, bytes: u64) {
        self.cycles += 1;
        let counter = match outcome {
            UpdateOutcome::NoUpdateAvailable => &mut self.no_update,
            UpdateOutcome::UpdateAppliedPendingRestart => &mut self.applied,
            UpdateOutcome::TransferFailed => &mut self.transfer_failed,
            UpdateOutcome::ValidationFailed => &mut self.validation_failed,
            UpdateOutcome::ConnectivityUnavailable => &mut self.connectivity_unavailable,
            UpdateOutcome::CommitFailed => &mut self.commit_failed,
        };
        *counter += 1;
        self.last_outcome = Some(outcome);
        self.last_bytes = bytes;
    }
}

/// Suspends the update task between cycles
pub trait Delay {
    fn delay(&mut self, duration: Duration);
}

pub struct StdDelay;

impl Delay for StdDelay {
    fn delay(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

pub struct UpdateController<P, T, B, R> {
    config: OtaConfig,
    current: VersionDescriptor,
    provider: P,
    provider_ready: bool,
    link: LinkMonitor,
    transport: T,
    boot: B,
    restart: R,
    state: CycleState,
    trace: Vec<CycleState>,
    stats: CycleStats,
}

impl<P, T, B, R> UpdateController<P, T, B, R>
where
    P: ConnectivityProvider,
    T: Transport,
    B: BootSelector<<T::Session as TransferSession>::Image>,
    R: Restart,
{
    pub fn new(
        config: OtaConfig,
        current: VersionDescriptor,
        mut provider: P,
        transport: T,
        boot: B,
        restart: R,
    ) -> Self {
        let link = LinkMonitor::from_provider(&mut provider);
        Self {
            config,
            current,
            provider,
            provider_ready: false,
            link,
            transport,
            boot,
            restart,
            state: CycleState::Idle,
            trace: vec![CycleState::Idle],
            stats: CycleStats::default(),
        }
    }

    /// One timer tick: run a cycle (unless updates are disabled), then wait
    /// out the check interval.
    pub fn tick<D: Delay>(&mut self, delay: &mut D) -> Option<UpdateOutcome> {
        let outcome = if self.config.enabled {
            Some(self.run_cycle())
        } else {
            log::debug!("OTA checks disabled, skipping cycle");
            None
        };
        delay.delay(self.config.check_interval());
        outcome
    }

    /// Check forever. Only a committed update (which restarts the device)
    /// ends this loop.
    pub fn run<D: Delay>(&mut self, delay: &mut D) -> ! {
        log::info!(
            "OTA task running: {} every {}s (current {})",
            self.config.endpoint_url,
            self.config.check_interval_secs,
            self.current
        );
        loop {
            self.tick(delay);
        }
    }

    pub fn run_cycle(&mut self) -> UpdateOutcome {
        self.trace.clear();
        self.trace.push(CycleState::Idle);
        log::info!("Checking for OTA updates...");

        let (outcome, bytes) = self.drive_cycle();

        self.stats.record(outcome, bytes);
        match outcome {
            UpdateOutcome::NoUpdateAvailable => log::info!("No update available"),
            UpdateOutcome::UpdateAppliedPendingRestart => log::info!("Update applied, restart pending"),
            UpdateOutcome::ConnectivityUnavailable => log::warn!("Update server unreachable, retrying next cycle"),
            other => log::error!("OTA cycle failed: {:?}, retrying next cycle", other),
        }
        self.enter(CycleState::Idle);
        if log::log_enabled!(log::Level::Debug) {
            if let Ok(json) = serde_json::to_string(&self.stats) {
                log::debug!("OTA stats: {}", json);
            }
        }
        outcome
    }

    fn drive_cycle(&mut self) -> (UpdateOutcome, u64) {
        if !self.ensure_link() {
            self.enter(CycleState::Failed);
            return (UpdateOutcome::ConnectivityUnavailable, 0);
        }

        let request = self.config.open_request();
        let session = match self.transport.open(&request) {
            Ok(session) => session,
            Err(e) => {
                log::error!("OTA begin failed: {}", e);
                self.enter(CycleState::Failed);
                return (e.outcome(), 0);
            }
        };
        let mut session = SessionGuard::new(session);
        self.enter(CycleState::SessionOpen);

        let candidate = match session.read_descriptor() {
            Ok(descriptor) => descriptor,
            Err(e) => {
                log::error!("Failed to read image descriptor: {}", e);
                self.enter(CycleState::Failed);
                return (UpdateOutcome::TransferFailed, session.bytes_transferred());
            }
        };
        self.enter(CycleState::DescriptorCompared);

        if decide(&self.current, &candidate) == Decision::Skip {
            log::info!("Running firmware {} is current", self.current);
            let bytes = session.bytes_transferred();
            session.close();
            self.enter(CycleState::Skipped);
            return (UpdateOutcome::NoUpdateAvailable, bytes);
        }

        log::info!("New firmware detected: {} (running {})", candidate, self.current);
        self.enter(CycleState::Streaming);

        let mut last_step = None;
        loop {
            match session.pull_next() {
                PullStatus::InProgress => {
                    let step = progress_percent(session.bytes_transferred(), session.total_size())
                        .map(|p| p / 10);
                    if step.is_some() && step != last_step {
                        log::info!(
                            "OTA progress: {}% ({}/{})",
                            step.unwrap_or(0) * 10,
                            session.bytes_transferred(),
                            session.total_size().unwrap_or(0)
                        );
                        last_step = step;
                    }
                }
                PullStatus::Done => break,
                PullStatus::Error(e) => {
                    log::error!("OTA transfer aborted after {} bytes: {}", session.bytes_transferred(), e);
                    self.enter(CycleState::Failed);
                    return (UpdateOutcome::TransferFailed, session.bytes_transferred());
                }
            }
        }

        let bytes = session.bytes_transferred();
        if !session.is_complete() {
            log::error!("Transport stopped after {} bytes without the full payload", bytes);
            self.enter(CycleState::Failed);
            return (UpdateOutcome::TransferFailed, bytes);
        }
        self.enter(CycleState::Completed);

        let image = match session.finalize() {
            Ok(image) => image,
            Err(e) => {
                log::error!("Image validation failed: {}", e);
                self.enter(CycleState::Failed);
                return (UpdateOutcome::ValidationFailed, bytes);
            }
        };
        session.close();
        drop(session);

        if let Err(e) = self.boot.commit(image) {
            log::error!("Failed to mark new image for boot: {}", e);
            self.enter(CycleState::Failed);
            return (UpdateOutcome::CommitFailed, bytes);
        }

        log::info!("Update to {} successful! Rebooting...", candidate);
        self.restart.restart();
        (UpdateOutcome::UpdateAppliedPendingRestart, bytes)
    }

    /// Bring the provider up on first use, then report the link state.
    fn ensure_link(&mut self) -> bool {
        if !self.provider_ready {
            match self.provider.init() {
                Ok(()) => {
                    self.provider_ready = true;
                    self.link.sync(self.provider.is_up());
                }
                Err(e) => {
                    log::warn!("Network link not ready: {}", e);
                    return false;
                }
            }
        }
        self.link.refresh()
    }

    fn enter(&mut self, state: CycleState) {
        log::debug!("OTA state {:?} -> {:?}", self.state, state);
        self.state = state;
        self.trace.push(state);
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    /// States visited by the most recent cycle, starting and ending in `Idle`
    pub fn last_trace(&self) -> &[CycleState] {
        &self.trace
    }

    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    /// Tear the link down. The device never calls this; hosts and tests do.
    pub fn shutdown(mut self) {
        if self.provider_ready {
            self.provider.teardown();
            self.provider_ready = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CommitError, OpenError, TransferError, ValidationError};
    use crate::sim::{
        CallLog, RecordingDelay, ScriptedSession, ScriptedTransport, SimBoot, SimLink, SimRestart,
    };

    type Controller = UpdateController<SimLink, ScriptedTransport, SimBoot, SimRestart>;

    fn controller(transport: ScriptedTransport, log: &CallLog) -> Controller {
        controller_with(transport, SimLink::up(log.clone()), SimBoot::new(log.clone()), log)
    }

    fn controller_with(transport: ScriptedTransport, link: SimLink, boot: SimBoot, log: &CallLog) -> Controller {
        UpdateController::new(
            OtaConfig::with_url("https://updates.example.com/fw.bin"),
            VersionDescriptor::new("1.0.0"),
            link,
            transport,
            boot,
            SimRestart::new(log.clone()),
        )
    }

    fn pulls(n_in_progress: usize, last: PullStatus) -> Vec<PullStatus> {
        let mut steps = vec![PullStatus::InProgress; n_in_progress];
        steps.push(last);
        steps
    }

    #[test]
    fn test_in_progress_n_times_then_done_pulls_n_plus_one() {
        for n in [0usize, 1, 5, 20] {
            let log = CallLog::default();
            let session = ScriptedSession::new("1.1.0", pulls(n, PullStatus::Done), log.clone());
            let mut ctl = controller(ScriptedTransport::new(log.clone()).then_session(session), &log);

            let outcome = ctl.run_cycle();

            assert_eq!(outcome, UpdateOutcome::UpdateAppliedPendingRestart);
            assert_eq!(log.snapshot().pulls, n as u32 + 1);
            assert!(ctl.last_trace().contains(&CycleState::Completed));
            assert_eq!(ctl.state(), CycleState::Idle);
        }
    }

    #[test]
    fn test_transfer_error_never_commits() {
        for at in [0usize, 1, 7] {
            let log = CallLog::default();
            let steps = pulls(at, PullStatus::Error(TransferError::Io("reset by peer".into())));
            let session = ScriptedSession::new("1.1.0", steps, log.clone());
            let mut ctl = controller(ScriptedTransport::new(log.clone()).then_session(session), &log);

            assert_eq!(ctl.run_cycle(), UpdateOutcome::TransferFailed);
            let calls = log.snapshot();
            assert_eq!(calls.commits, 0);
            assert_eq!(calls.finalizes, 0);
            assert_eq!(calls.restarts, 0);
            assert_eq!(calls.releases, 1);
            assert_eq!(
                ctl.last_trace(),
                &[
                    CycleState::Idle,
                    CycleState::SessionOpen,
                    CycleState::DescriptorCompared,
                    CycleState::Streaming,
                    CycleState::Failed,
                    CycleState::Idle
                ]
            );
        }
    }

    #[test]
    fn test_open_failure_never_reads_descriptor() {
        let log = CallLog::default();
        let transport = ScriptedTransport::new(log.clone())
            .then_open_error(OpenError::Tls("certificate verify failed".into()))
            .then_open_error(OpenError::HttpStatus(404));
        let mut ctl = controller(transport, &log);

        assert_eq!(ctl.run_cycle(), UpdateOutcome::ConnectivityUnavailable);
        assert_eq!(ctl.run_cycle(), UpdateOutcome::TransferFailed);

        let calls = log.snapshot();
        assert_eq!(calls.opens, 2);
        assert_eq!(calls.descriptor_reads, 0);
        assert_eq!(calls.pulls, 0);
        assert_eq!(ctl.last_trace(), &[CycleState::Idle, CycleState::Failed, CycleState::Idle]);
    }

    #[test]
    fn test_link_down_skips_open() {
        let log = CallLog::default();
        let link = SimLink::down(log.clone());
        let handle = link.handle();
        let session = ScriptedSession::new("1.0.0", vec![], log.clone());
        let transport = ScriptedTransport::new(log.clone()).then_session(session);
        let mut ctl = controller_with(transport, link, SimBoot::new(log.clone()), &log);

        assert_eq!(ctl.run_cycle(), UpdateOutcome::ConnectivityUnavailable);
        assert_eq!(log.snapshot().opens, 0);

        handle.set_up(true);
        assert_eq!(ctl.run_cycle(), UpdateOutcome::NoUpdateAvailable);
        assert_eq!(log.snapshot().opens, 1);
    }

    #[test]
    fn test_provider_init_failure_is_retried_next_cycle() {
        let log = CallLog::default();
        let link = SimLink::up(log.clone()).failing_init(1);
        let session = ScriptedSession::new("1.0.0", vec![], log.clone());
        let transport = ScriptedTransport::new(log.clone()).then_session(session);
        let mut ctl = controller_with(transport, link, SimBoot::new(log.clone()), &log);

        assert_eq!(ctl.run_cycle(), UpdateOutcome::ConnectivityUnavailable);
        assert_eq!(ctl.run_cycle(), UpdateOutcome::NoUpdateAvailable);
        assert_eq!(log.snapshot().inits, 2);

        ctl.shutdown();
        assert_eq!(log.snapshot().teardowns, 1);
    }

    #[test]
    fn test_validation_failure_never_commits() {
        let log = CallLog::default();
        let session = ScriptedSession::new("1.1.0", pulls(3, PullStatus::Done), log.clone())
            .with_finalize(Err(ValidationError::DigestMismatch));
        let mut ctl = controller(ScriptedTransport::new(log.clone()).then_session(session), &log);

        assert_eq!(ctl.run_cycle(), UpdateOutcome::ValidationFailed);
        let calls = log.snapshot();
        assert_eq!(calls.finalizes, 1);
        assert_eq!(calls.commits, 0);
        assert_eq!(calls.restarts, 0);
        assert!(ctl.last_trace().ends_with(&[CycleState::Completed, CycleState::Failed, CycleState::Idle]));
    }

    #[test]
    fn test_done_without_full_payload_is_transfer_failure() {
        let log = CallLog::default();
        let session = ScriptedSession::new("1.1.0", pulls(2, PullStatus::Done), log.clone()).incomplete_on_done();
        let mut ctl = controller(ScriptedTransport::new(log.clone()).then_session(session), &log);

        assert_eq!(ctl.run_cycle(), UpdateOutcome::TransferFailed);
        assert_eq!(log.snapshot().finalizes, 0);
        assert!(!ctl.last_trace().contains(&CycleState::Completed));
    }

    #[test]
    fn test_commit_failure_keeps_running_image() {
        let log = CallLog::default();
        let session = ScriptedSession::new("1.1.0", pulls(1, PullStatus::Done), log.clone());
        let boot = SimBoot::new(log.clone()).failing(CommitError::Partition("ESP_ERR_OTA_VALIDATE_FAILED".into()));
        let transport = ScriptedTransport::new(log.clone()).then_session(session);
        let mut ctl = controller_with(transport, SimLink::up(log.clone()), boot, &log);

        assert_eq!(ctl.run_cycle(), UpdateOutcome::CommitFailed);
        let calls = log.snapshot();
        assert_eq!(calls.commits, 1);
        assert_eq!(calls.restarts, 0);
        assert_eq!(ctl.stats().commit_failed, 1);
    }

    #[test]
    fn test_descriptor_error_is_transfer_failure() {
        let log = CallLog::default();
        let session = ScriptedSession::new("1.1.0", vec![], log.clone())
            .with_descriptor_error(TransferError::Io("connection closed".into()));
        let mut ctl = controller(ScriptedTransport::new(log.clone()).then_session(session), &log);

        assert_eq!(ctl.run_cycle(), UpdateOutcome::TransferFailed);
        assert_eq!(log.snapshot().pulls, 0);
        assert_eq!(log.snapshot().releases, 1);
    }

    #[test]
    fn test_success_path_closes_twice_releases_once() {
        let log = CallLog::default();
        let session = ScriptedSession::new("1.1.0", pulls(2, PullStatus::Done), log.clone());
        let mut ctl = controller(ScriptedTransport::new(log.clone()).then_session(session), &log);

        ctl.run_cycle();
        let calls = log.snapshot();
        assert_eq!(calls.closes, 2);
        assert_eq!(calls.releases, 1);
    }

    #[test]
    fn test_disabled_config_skips_cycle_but_waits() {
        let log = CallLog::default();
        let mut ctl = controller(ScriptedTransport::new(log.clone()), &log);
        ctl.config.enabled = false;
        let mut delay = RecordingDelay::default();

        assert_eq!(ctl.tick(&mut delay), None);
        assert_eq!(log.snapshot().opens, 0);
        assert_eq!(delay.waits, vec![Duration::from_secs(30)]);
    }

    #[test]
    fn test_stats_accumulate() {
        let log = CallLog::default();
        let transport = ScriptedTransport::new(log.clone())
            .then_session(ScriptedSession::new("1.0.0", vec![], log.clone()))
            .then_open_error(OpenError::Timeout(10_000))
            .then_session(ScriptedSession::new("1.0.0", vec![], log.clone()));
        let mut ctl = controller(transport, &log);

        for _ in 0..3 {
            ctl.run_cycle();
        }
        let stats = ctl.stats();
        assert_eq!(stats.cycles, 3);
        assert_eq!(stats.no_update, 2);
        assert_eq!(stats.connectivity_unavailable, 1);
        assert_eq!(stats.last_outcome, Some(UpdateOutcome::NoUpdateAvailable));
    }
}
