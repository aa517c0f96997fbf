use std::ops::{Deref, DerefMut};
use std::thread;
use std::time::Instant;
use log::{debug, error, info, warn};
use crate::config::{ErrorPolicy, SessionConfig, Timing};
use crate::drivers::channel::FramedChannel;
use crate::drivers::link::SerialLink;
use crate::drivers::parse::{parse_error_status, parse_identity, parse_triple};
use crate::drivers::retry::RetryPolicy;
use crate::drivers::SmuError;
use crate::types::{ErrorStatus, Identity, MeasurementKind, SessionState};
pub const IDN_QUERY: &str = "*IDN?";
pub const ERROR_QUERY: &str = ":SYST:ERR?";
pub const OUTPUT_ON: &str = ":OUTP ON";
pub const OUTPUT_OFF: &str = ":OUTP OFF";
pub const OUTPUT_INTERLOCK_OFF: &str = ":OUTP:ENAB OFF";
pub const BEEPER_OFF: &str = ":SYST:BEEP:STAT 0";
pub const SOURCE_VOLTAGE_MODE: &str = ":SOUR:FUNC:MODE VOLT";
pub const CURRENT_COMPLIANCE: &str = ":CURR:PROT:LEV";
pub const VOLTAGE_RANGE_AUTO: &str = ":SOUR:VOLT:RANG:AUTO ON";
pub const VOLTAGE_LEVEL: &str = ":SOUR:VOLT:LEV:IMM:AMPL";
pub fn measure_query(kind: MeasurementKind) -> &'static str {
    match kind {
        MeasurementKind::Voltage => ":MEAS:VOLT?",
        MeasurementKind::Current => ":MEAS:CURR?",
        MeasurementKind::Resistance => ":MEAS:RES?",
    }
}
/// One SMU on one channel. Commands are strictly one at a time: write,
/// settle, read, then check the error queue.
pub struct InstrumentSession<L: SerialLink> {
    channel: FramedChannel<L>,
    timing: Timing,
    config: SessionConfig,
    state: SessionState,
    identity: Option<Identity>,
    retry_warnings: usize,
}
impl<L: SerialLink> InstrumentSession<L> {
    pub fn new(channel: FramedChannel<L>, timing: Timing, config: SessionConfig) -> Self {
        Self {
            channel,
            timing,
            config,
            state: SessionState::Disconnected,
            identity: None,
            retry_warnings: 0,
        }
    }
    pub fn state(&self) -> SessionState {
        self.state
    }
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }
    /// Measurement attempts that failed and were retried over the session's life.
    pub fn retry_warnings(&self) -> usize {
        self.retry_warnings
    }
    pub fn channel(&self) -> &FramedChannel<L> {
        &self.channel
    }
    pub fn identify(&mut self) -> Result<Identity, SmuError> {
        let raw = self
            .channel
            .ask(IDN_QUERY, self.timing.read_timeout(), true)?;
        let identity = parse_identity(&raw, char::from(self.channel.framing().begin))?;
        info!(
            "connected to {} {} (s/n {}, fw {})",
            identity.vendor, identity.model, identity.serial, identity.firmware
        );
        self.identity = Some(identity.clone());
        if self.state == SessionState::Disconnected {
            self.state = SessionState::Identified;
        }
        Ok(identity)
    }
    /// Sends `command`, waits the settle delay and reads the reply, then
    /// checks the error queue. Queries (ending in `?`) wait for a complete
    /// frame; setters only take what is already there, usually nothing.
    pub fn execute(&mut self, command: &str) -> Result<String, SmuError> {
        let started = Instant::now();
        self.channel.write(command)?;
        thread::sleep(self.timing.settle());
        let wait = command.trim_end().ends_with('?');
        let reply = self
            .channel
            .read_from(started, self.timing.read_timeout(), wait)?;
        if !reply.is_empty() {
            debug!("{command} -> {reply:?}");
        }
        self.error_check()?;
        Ok(reply)
    }
    /// Reads one error queue entry and applies the session's error policy.
    pub fn error_check(&mut self) -> Result<ErrorStatus, SmuError> {
        let status = self.read_error_status()?;
        if !status.is_clear() {
            match self.config.error_policy {
                ErrorPolicy::Log => warn!("instrument error {status}"),
                ErrorPolicy::Strict => {
                    return Err(SmuError::Instrument {
                        code: status.code,
                        message: status.message,
                    })
                }
            }
        }
        Ok(status)
    }
    fn read_error_status(&mut self) -> Result<ErrorStatus, SmuError> {
        let started = Instant::now();
        self.channel.write(ERROR_QUERY)?;
        thread::sleep(self.timing.settle());
        let raw = self
            .channel
            .read_from(started, self.timing.read_timeout(), true)?;
        parse_error_status(&raw)
    }
    /// Pops the error queue until it reports code 0 and returns how many
    /// entries were discarded. Gives up after `max_drain_attempts` reads.
    ///
    /// Every non-zero code is drained, not only "system busy": a K2401 holds
    /// several stale entries after power-up. Termination comes from the read
    /// bound, and transport or parse faults end the drain at once.
    pub fn clear_errors(&mut self) -> Result<u32, SmuError> {
        let budget = self.config.max_drain_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let status = self.read_error_status()?;
            if status.is_clear() {
                if attempt > 1 {
                    info!("error queue cleared, {} entries discarded", attempt - 1);
                }
                return Ok(attempt - 1);
            }
            warn!("discarding queued error {status}");
            if attempt >= budget {
                return Err(SmuError::ErrorsNeverCleared {
                    attempts: attempt,
                    last: status,
                });
            }
        }
    }
    /// Takes one reading and returns the requested part of the V/I/R triple.
    pub fn measure(&mut self, kind: MeasurementKind) -> Result<f64, SmuError> {
        self.require(
            "measure",
            &[
                SessionState::Identified,
                SessionState::Configured,
                SessionState::Sourcing,
                SessionState::Idle,
            ],
        )?;
        let query = measure_query(kind);
        let mut warnings = 0;
        let result = RetryPolicy::new(self.config.retry_attempts).run(
            |_| -> Result<_, SmuError> {
                let raw = self.execute(query)?;
                parse_triple(&raw)
            },
            SmuError::is_transient,
            |attempt, err| {
                warnings += 1;
                warn!("{query} attempt {attempt} failed: {err}");
            },
        );
        self.retry_warnings += warnings;
        result.map(|triple| triple.component(kind))
    }
    /// Voltage source, fixed current compliance, auto voltage range.
    pub fn configure(&mut self, compliance_amps: f64) -> Result<(), SmuError> {
        self.require(
            "configure",
            &[
                SessionState::Identified,
                SessionState::Configured,
                SessionState::Idle,
            ],
        )?;
        self.execute(BEEPER_OFF)?;
        self.execute(OUTPUT_INTERLOCK_OFF)?;
        self.execute(SOURCE_VOLTAGE_MODE)?;
        self.execute(&format!("{CURRENT_COMPLIANCE} {compliance_amps:.6}"))?;
        self.execute(VOLTAGE_RANGE_AUTO)?;
        self.state = SessionState::Configured;
        Ok(())
    }
    pub fn set_voltage(&mut self, volts: f64) -> Result<(), SmuError> {
        self.require(
            "set voltage",
            &[
                SessionState::Configured,
                SessionState::Sourcing,
                SessionState::Idle,
            ],
        )?;
        self.execute(&format!("{VOLTAGE_LEVEL} {volts:.6}"))?;
        Ok(())
    }
    /// Turns the output on. Prefer [`start_sourcing`](Self::start_sourcing),
    /// which guarantees the matching disable.
    pub fn enable_output(&mut self) -> Result<(), SmuError> {
        self.require(
            "enable output",
            &[SessionState::Configured, SessionState::Idle],
        )?;
        // the relay may have closed even if the error check below fails
        self.state = SessionState::Sourcing;
        self.execute(OUTPUT_ON)?;
        Ok(())
    }
    pub fn disable_output(&mut self) -> Result<(), SmuError> {
        if self.state == SessionState::Disconnected {
            return Err(SmuError::InvalidState {
                operation: "disable output",
                state: self.state,
            });
        }
        self.execute(OUTPUT_OFF)?;
        self.state = SessionState::Idle;
        Ok(())
    }
    /// Enables the output and returns a guard that disables it again when
    /// finished or dropped.
    pub fn start_sourcing(&mut self) -> Result<SourcingGuard<'_, L>, SmuError> {
        self.require(
            "enable output",
            &[SessionState::Configured, SessionState::Idle],
        )?;
        let guard = SourcingGuard {
            session: self,
            armed: true,
        };
        guard.session.enable_output()?;
        Ok(guard)
    }
    fn require(&self, operation: &'static str, allowed: &[SessionState]) -> Result<(), SmuError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SmuError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }
}
/// Output-on scope. `finish` disables and reports failure; dropping without
/// `finish` (early return, panic) disables and only logs failure, so the
/// error that caused the unwind is the one the caller sees.
pub struct SourcingGuard<'a, L: SerialLink> {
    session: &'a mut InstrumentSession<L>,
    armed: bool,
}
impl<L: SerialLink> SourcingGuard<'_, L> {
    pub fn finish(mut self) -> Result<(), SmuError> {
        self.armed = false;
        self.session.disable_output()
    }
}
impl<L: SerialLink> Deref for SourcingGuard<'_, L> {
    type Target = InstrumentSession<L>;
    fn deref(&self) -> &Self::Target {
        self.session
    }
}
impl<L: SerialLink> DerefMut for SourcingGuard<'_, L> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session
    }
}
impl<L: SerialLink> Drop for SourcingGuard<'_, L> {
    fn drop(&mut self) {
        if self.armed {
            self.armed = false;
            if let Err(e) = self.session.disable_output() {
                error!("failed to disable output during cleanup: {e}");
            }
        }
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Framing;
    use crate::drivers::link::ManualLink;
    use crate::drivers::simulated::SimulatedSmu;
    use std::time::Duration;
    fn session(smu: SimulatedSmu, policy: ErrorPolicy) -> InstrumentSession<SimulatedSmu> {
        let config = SessionConfig {
            error_policy: policy,
            ..Default::default()
        };
        InstrumentSession::new(
            FramedChannel::new(smu, Framing::default()),
            Timing::immediate(),
            config,
        )
    }
    fn link(s: &InstrumentSession<SimulatedSmu>) -> &SimulatedSmu {
        s.channel().link()
    }
    #[test]
    fn identify_moves_to_identified() {
        let mut s = session(SimulatedSmu::default().with_framed_replies(true), ErrorPolicy::Log);
        assert_eq!(s.state(), SessionState::Disconnected);
        let id = s.identify().unwrap();
        assert_eq!(id.model, "MODEL 2401");
        assert_eq!(s.state(), SessionState::Identified);
        assert_eq!(s.identity(), Some(&id));
    }
    #[test]
    fn identify_rejects_short_reply() {
        let link = ManualLink::new(["KEITHLEY,MODEL 2401\r"]);
        let mut s = InstrumentSession::new(
            FramedChannel::new(link, Framing::default()),
            Timing::immediate(),
            SessionConfig::default(),
        );
        assert!(matches!(s.identify(), Err(SmuError::Parse { .. })));
        assert_eq!(s.state(), SessionState::Disconnected);
    }
    #[test]
    fn execute_checks_error_queue_after_every_command() {
        let mut s = session(SimulatedSmu::default(), ErrorPolicy::Log);
        s.execute(":SYST:BEEP:STAT 0").unwrap();
        assert_eq!(link(&s).commands(), [":SYST:BEEP:STAT 0", ":SYST:ERR?"]);
    }
    #[test]
    fn logged_policy_tolerates_instrument_errors() {
        let mut s = session(SimulatedSmu::default(), ErrorPolicy::Log);
        s.execute(":BOGUS").unwrap();
        assert!(s.error_check().unwrap().is_clear());
    }
    #[test]
    fn strict_policy_surfaces_instrument_errors() {
        let mut s = session(SimulatedSmu::default(), ErrorPolicy::Strict);
        let err = s.execute(":BOGUS").unwrap_err();
        assert!(matches!(err, SmuError::Instrument { code: -113, .. }));
    }
    #[test]
    fn clear_errors_drains_queue() {
        let mut smu = SimulatedSmu::default();
        smu.push_error(-222, "Data out of range");
        smu.push_error(-113, "Undefined header");
        let mut s = session(smu, ErrorPolicy::Strict);
        assert_eq!(s.clear_errors().unwrap(), 2);
        assert_eq!(s.clear_errors().unwrap(), 0);
    }
    #[test]
    fn clear_errors_gives_up_eventually() {
        let mut smu = SimulatedSmu::default();
        for _ in 0..20 {
            smu.push_error(-350, "Queue overflow");
        }
        let mut s = session(smu, ErrorPolicy::Log);
        match s.clear_errors().unwrap_err() {
            SmuError::ErrorsNeverCleared { attempts, last } => {
                assert_eq!(attempts, 16);
                assert_eq!(last.code, -350);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
    #[test]
    fn clear_errors_stops_on_unreadable_reply() {
        let link = ManualLink::new(["garbage\r"]);
        let mut s = InstrumentSession::new(
            FramedChannel::new(link, Framing::default()),
            Timing::immediate(),
            SessionConfig::default(),
        );
        assert!(matches!(s.clear_errors(), Err(SmuError::Parse { .. })));
    }
    #[test]
    fn measure_picks_requested_component() {
        let mut s = session(SimulatedSmu::new(100.0).with_five_fields(true), ErrorPolicy::Strict);
        s.identify().unwrap();
        s.configure(0.1).unwrap();
        s.set_voltage(2.0).unwrap();
        s.enable_output().unwrap();
        assert_eq!(s.measure(MeasurementKind::Voltage).unwrap(), 2.0);
        assert_eq!(s.measure(MeasurementKind::Current).unwrap(), 0.02);
        assert_eq!(s.measure(MeasurementKind::Resistance).unwrap(), 100.0);
        assert_eq!(s.retry_warnings(), 0);
    }
    #[test]
    fn measure_survives_two_bad_replies() {
        let mut smu = SimulatedSmu::new(100.0);
        smu.script_measurement("+1.500000E+00,+1.5424");
        smu.script_measurement("+1.500000E+00,bad,+9.9E37");
        smu.script_measurement("+1.500000E+00,+1.542443E-06,+9.910000E+37");
        let mut s = session(smu, ErrorPolicy::Strict);
        s.identify().unwrap();
        let amps = s.measure(MeasurementKind::Current).unwrap();
        assert_eq!(amps, 1.542443e-6);
        assert_eq!(s.retry_warnings(), 2);
    }
    #[test]
    fn measure_gives_up_after_third_bad_reply() {
        let mut smu = SimulatedSmu::new(100.0);
        for _ in 0..3 {
            smu.script_measurement("1,2");
        }
        let mut s = session(smu, ErrorPolicy::Strict);
        s.identify().unwrap();
        let err = s.measure(MeasurementKind::Voltage).unwrap_err();
        assert!(matches!(err, SmuError::Parse { ref raw, .. } if raw == "1,2"));
        assert_eq!(s.retry_warnings(), 2);
    }
    #[test]
    fn measure_survives_two_lost_replies() {
        let mut smu = SimulatedSmu::new(100.0);
        smu.drop_reply_to(":MEAS:RES?", 2);
        let mut s = session(smu, ErrorPolicy::Strict);
        s.identify().unwrap();
        assert_eq!(s.measure(MeasurementKind::Resistance).unwrap(), 9.9e37);
        assert_eq!(s.retry_warnings(), 2);
        assert_eq!(
            link(&s).commands().iter().filter(|c| *c == ":MEAS:RES?").count(),
            3
        );
    }
    #[test]
    fn measure_times_out_after_third_lost_reply() {
        let mut smu = SimulatedSmu::new(100.0);
        smu.drop_reply_to(":MEAS:RES?", 3);
        let mut s = session(smu, ErrorPolicy::Strict);
        s.identify().unwrap();
        assert!(matches!(
            s.measure(MeasurementKind::Resistance),
            Err(SmuError::Timeout { .. })
        ));
        assert_eq!(s.retry_warnings(), 2);
    }
    #[test]
    fn settle_delay_counts_against_read_timeout() {
        let mut smu = SimulatedSmu::new(100.0);
        smu.drop_reply_to(":MEAS:VOLT?", 1);
        let timing = Timing {
            settle_ms: 200,
            read_timeout_ms: 50,
            ..Timing::immediate()
        };
        let mut s = InstrumentSession::new(
            FramedChannel::new(smu, Framing::default()),
            timing,
            SessionConfig::default(),
        );
        let started = Instant::now();
        let err = s.execute(":MEAS:VOLT?").unwrap_err();
        let elapsed = started.elapsed();
        match err {
            SmuError::Timeout { waited, .. } => {
                assert!(waited >= Duration::from_millis(200));
                assert!(waited <= elapsed);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(elapsed < Duration::from_millis(245), "took {elapsed:?}");
    }
    #[test]
    fn instrument_faults_are_not_retried() {
        let mut smu = SimulatedSmu::new(100.0);
        smu.fault_on(":MEAS:RES?", -221, "Settings conflict");
        let mut s = session(smu, ErrorPolicy::Strict);
        s.identify().unwrap();
        assert!(matches!(
            s.measure(MeasurementKind::Resistance),
            Err(SmuError::Instrument { code: -221, .. })
        ));
        assert_eq!(s.retry_warnings(), 0);
    }
    #[test]
    fn state_machine_rejects_out_of_order_calls() {
        let mut s = session(SimulatedSmu::default(), ErrorPolicy::Log);
        assert!(matches!(
            s.measure(MeasurementKind::Voltage),
            Err(SmuError::InvalidState { .. })
        ));
        s.identify().unwrap();
        assert!(matches!(
            s.enable_output(),
            Err(SmuError::InvalidState { state: SessionState::Identified, .. })
        ));
        s.configure(0.1).unwrap();
        s.enable_output().unwrap();
        assert_eq!(s.state(), SessionState::Sourcing);
        s.disable_output().unwrap();
        assert_eq!(s.state(), SessionState::Idle);
    }
    #[test]
    fn sourcing_guard_disables_on_drop() {
        let mut s = session(SimulatedSmu::default(), ErrorPolicy::Log);
        s.identify().unwrap();
        s.configure(0.1).unwrap();
        {
            let guard = s.start_sourcing().unwrap();
            assert_eq!(guard.state(), SessionState::Sourcing);
            assert!(link(&guard).output_on());
        }
        assert_eq!(s.state(), SessionState::Idle);
        assert!(!link(&s).output_on());
        assert_eq!(link(&s).output_disable_count(), 1);
    }
    #[test]
    fn sourcing_guard_finish_disables_once() {
        let mut s = session(SimulatedSmu::default(), ErrorPolicy::Log);
        s.identify().unwrap();
        s.configure(0.1).unwrap();
        let guard = s.start_sourcing().unwrap();
        guard.finish().unwrap();
        assert_eq!(link(&s).output_disable_count(), 1);
    }
}
