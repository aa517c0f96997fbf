use std::collections::VecDeque;
use std::io;
use crate::config::Framing;
use crate::drivers::link::SerialLink;
use crate::types::ErrorStatus;
/// Resistance the K2401 reports when no current flows.
pub const OVERFLOW_OHMS: f64 = 9.9e37;
const IDN_REPLY: &str = "KEITHLEY INSTRUMENTS INC.,MODEL 2401,4072483,A01 Aug 25 2011 12:57:43/A02  /T/K";
/// Software stand-in for a K2401 driving a resistive load.
///
/// Understands the command subset the session issues, keeps a SCPI-style
/// error queue and answers queries with framed or CR-terminated replies.
/// Useful for tests and for dry runs of the driver without hardware.
pub struct SimulatedSmu {
    framing: Framing,
    framed_replies: bool,
    five_field: bool,
    chunk_size: usize,
    load_ohms: f64,
    compliance_amps: f64,
    level: f64,
    output_on: bool,
    inbox: Vec<u8>,
    outbox: VecDeque<u8>,
    errors: VecDeque<ErrorStatus>,
    faults: Vec<(String, ErrorStatus)>,
    scripted: VecDeque<String>,
    dropped: Vec<(String, usize)>,
    muted: bool,
    commands: Vec<String>,
    enable_count: usize,
    disable_count: usize,
}
impl Default for SimulatedSmu {
    fn default() -> Self {
        Self::new(100.0)
    }
}
impl SimulatedSmu {
    pub fn new(load_ohms: f64) -> Self {
        Self {
            framing: Framing::default(),
            framed_replies: false,
            five_field: false,
            chunk_size: 64,
            load_ohms,
            compliance_amps: 0.1,
            level: 0.0,
            output_on: false,
            inbox: Vec::new(),
            outbox: VecDeque::new(),
            errors: VecDeque::new(),
            faults: Vec::new(),
            scripted: VecDeque::new(),
            dropped: Vec::new(),
            muted: false,
            commands: Vec::new(),
            enable_count: 0,
            disable_count: 0,
        }
    }
    /// Wrap replies in BEGIN/END the way the K2700 family does.
    pub fn with_framed_replies(mut self, framed: bool) -> Self {
        self.framed_replies = framed;
        self
    }
    /// Answer measurements with five fields instead of three.
    pub fn with_five_fields(mut self, five: bool) -> Self {
        self.five_field = five;
        self
    }
    /// Hand out at most `size` bytes per read.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }
    /// Queue an error when `command` arrives, reported by the next error query.
    pub fn fault_on(&mut self, command: &str, code: i32, message: &str) {
        self.faults.push((
            command.to_owned(),
            ErrorStatus {
                code,
                message: message.to_owned(),
            },
        ));
    }
    pub fn push_error(&mut self, code: i32, message: &str) {
        self.errors.push_back(ErrorStatus {
            code,
            message: message.to_owned(),
        });
    }
    /// Next measurement query gets `raw` verbatim instead of a model reading.
    pub fn script_measurement(&mut self, raw: &str) {
        self.scripted.push_back(raw.to_owned());
    }
    /// Stay silent on the next `n` arrivals of `command`, as if the reply
    /// was lost on the wire. The command itself still takes effect.
    pub fn drop_reply_to(&mut self, command: &str, n: usize) {
        self.dropped.push((command.to_owned(), n));
    }
    pub fn commands(&self) -> &[String] {
        &self.commands
    }
    pub fn output_on(&self) -> bool {
        self.output_on
    }
    pub fn output_enable_count(&self) -> usize {
        self.enable_count
    }
    pub fn output_disable_count(&self) -> usize {
        self.disable_count
    }
    fn handle(&mut self, line: &str) {
        let command = line.trim();
        if command.is_empty() {
            return;
        }
        self.commands.push(command.to_owned());
        if let Some(pos) = self.faults.iter().position(|(c, _)| c == command) {
            let (_, status) = self.faults.remove(pos);
            self.errors.push_back(status);
        }
        self.muted = false;
        if let Some((_, left)) = self
            .dropped
            .iter_mut()
            .find(|(c, left)| c == command && *left > 0)
        {
            *left -= 1;
            self.muted = true;
        }
        let upper = command.to_ascii_uppercase();
        let (head, arg) = match upper.split_once(' ') {
            Some((head, arg)) => (head, Some(arg.trim())),
            None => (upper.as_str(), None),
        };
        match (head, arg) {
            ("*IDN?", None) => self.reply(IDN_REPLY),
            (":SYST:ERR?", None) => {
                let status = self.errors.pop_front().unwrap_or(ErrorStatus {
                    code: 0,
                    message: "No error".to_owned(),
                });
                self.reply(&status.to_string());
            }
            (":OUTP", Some("ON")) => {
                self.output_on = true;
                self.enable_count += 1;
            }
            (":OUTP", Some("OFF")) => {
                self.output_on = false;
                self.disable_count += 1;
            }
            (":SOUR:VOLT:LEV:IMM:AMPL", Some(value)) => match value.parse() {
                Ok(v) => self.level = v,
                Err(_) => self.push_error(-104, "Data type error"),
            },
            (":CURR:PROT:LEV", Some(value)) => match value.parse() {
                Ok(v) => self.compliance_amps = v,
                Err(_) => self.push_error(-104, "Data type error"),
            },
            (":MEAS:VOLT?", None) | (":MEAS:CURR?", None) | (":MEAS:RES?", None) => {
                let raw = match self.scripted.pop_front() {
                    Some(raw) => raw,
                    None => self.reading(),
                };
                self.reply(&raw);
            }
            (":SYST:BEEP:STAT", Some(_))
            | (":OUTP:ENAB", Some(_))
            | (":SOUR:FUNC:MODE", Some(_))
            | (":SOUR:VOLT:RANG:AUTO", Some(_)) => {}
            _ => self.push_error(-113, "Undefined header"),
        }
    }
    fn reading(&self) -> String {
        let volts = if self.output_on { self.level } else { 0.0 };
        let mut amps = volts / self.load_ohms;
        let mut volts = volts;
        if amps.abs() > self.compliance_amps {
            amps = self.compliance_amps.copysign(amps);
            volts = amps * self.load_ohms;
        }
        let ohms = if amps == 0.0 {
            OVERFLOW_OHMS
        } else {
            self.load_ohms
        };
        let mut raw = format!("{volts:+.6E},{amps:+.6E},{ohms:+.6E}");
        if self.five_field {
            raw.push_str(",+8.039714E+03,+3.482000E+04");
        }
        raw
    }
    fn reply(&mut self, text: &str) {
        if self.muted {
            return;
        }
        if self.framed_replies {
            self.outbox.push_back(self.framing.begin);
            self.outbox.extend(text.bytes());
            self.outbox.push_back(self.framing.end);
            self.outbox.push_back(b'\n');
        } else {
            self.outbox.extend(text.bytes());
            self.outbox.push_back(self.framing.terminator);
        }
    }
}
impl SerialLink for SimulatedSmu {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        for &b in bytes {
            if b == b'\r' || b == b'\n' {
                let line = String::from_utf8_lossy(&self.inbox).into_owned();
                self.inbox.clear();
                self.handle(&line);
            } else {
                self.inbox.push(b);
            }
        }
        Ok(())
    }
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.outbox.len().min(buf.len()).min(self.chunk_size);
        for (slot, byte) in buf.iter_mut().zip(self.outbox.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}
