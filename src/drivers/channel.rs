use std::thread;
use std::time::{Duration, Instant};
use log::{debug, warn};
use crate::config::Framing;
use crate::drivers::link::SerialLink;
use crate::drivers::SmuError;
/// Which condition closed a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    EndByte,
    CarriageReturn,
}
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Accumulating,
    Framed(Termination),
    TimedOut,
}
/// Collects response bytes until one of the two boundary conditions shows up.
///
/// Framing bytes are ASCII control characters, so they can be searched for in
/// the decoded text directly.
pub struct FrameAccumulator {
    framing: Framing,
    text: String,
    // tail of a multi-byte sequence split across reads
    carry: Vec<u8>,
    cut: Option<usize>,
    glitches: usize,
    state: FrameState,
}
impl FrameAccumulator {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            text: String::new(),
            carry: Vec::new(),
            cut: None,
            glitches: 0,
            state: FrameState::Accumulating,
        }
    }
    pub fn state(&self) -> FrameState {
        self.state
    }
    /// Decoded text so far, framing bytes included.
    pub fn partial(&self) -> &str {
        &self.text
    }
    /// Number of byte runs dropped because they were not valid text.
    pub fn glitches(&self) -> usize {
        self.glitches
    }
    pub fn push(&mut self, bytes: &[u8]) -> FrameState {
        if self.state != FrameState::Accumulating {
            return self.state;
        }
        let scan_from = self.text.len();
        self.decode(bytes);
        let end = char::from(self.framing.end);
        let terminator = char::from(self.framing.terminator);
        if let Some((idx, c)) = self.text[scan_from..]
            .char_indices()
            .find(|&(_, c)| c == end || c == terminator)
        {
            self.cut = Some(scan_from + idx);
            self.state = FrameState::Framed(if c == end {
                Termination::EndByte
            } else {
                Termination::CarriageReturn
            });
        }
        self.state
    }
    /// Called by the owner once its deadline has passed.
    pub fn expire(&mut self) -> FrameState {
        if self.state == FrameState::Accumulating {
            self.state = FrameState::TimedOut;
        }
        self.state
    }
    /// Cuts the text at the END byte or terminator, then strips whitespace and
    /// the BEGIN byte. The cut already removes END.
    pub fn finish(self) -> String {
        let frame = match self.cut {
            Some(cut) => &self.text[..cut],
            None => self.text.as_str(),
        };
        let frame = frame.trim();
        let frame = frame
            .strip_prefix(char::from(self.framing.begin))
            .unwrap_or(frame);
        frame.trim().to_owned()
    }
    fn decode(&mut self, bytes: &[u8]) {
        self.carry.extend_from_slice(bytes);
        loop {
            match std::str::from_utf8(&self.carry) {
                Ok(s) => {
                    self.text.push_str(s);
                    self.carry.clear();
                    return;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    self.text
                        .push_str(std::str::from_utf8(&self.carry[..valid]).unwrap_or_default());
                    match e.error_len() {
                        None => {
                            self.carry.drain(..valid);
                            return;
                        }
                        Some(bad) => {
                            warn!("decode error, have {:?}", self.text);
                            self.glitches += 1;
                            self.carry.drain(..valid + bad);
                        }
                    }
                }
            }
        }
    }
}
/// Line-oriented request/response channel on top of a raw link.
pub struct FramedChannel<L: SerialLink> {
    link: L,
    framing: Framing,
    poll_interval: Duration,
}
impl<L: SerialLink> FramedChannel<L> {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);
    pub fn new(link: L, framing: Framing) -> Self {
        Self {
            link,
            framing,
            poll_interval: Duration::from_millis(1),
        }
    }
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
    pub fn framing(&self) -> Framing {
        self.framing
    }
    pub fn link(&self) -> &L {
        &self.link
    }
    /// Sends `command` followed by exactly one terminator byte.
    pub fn write(&mut self, command: &str) -> Result<(), SmuError> {
        let mut bytes = Vec::with_capacity(command.len() + 1);
        bytes.extend_from_slice(command.as_bytes());
        bytes.push(self.framing.terminator);
        debug!("tx {command:?}");
        self.link.send(&bytes)?;
        Ok(())
    }
    pub fn ask(&mut self, command: &str, timeout: Duration, wait: bool) -> Result<String, SmuError> {
        let started = Instant::now();
        self.write(command)?;
        self.read_from(started, timeout, wait)
    }
    /// Reads one response. With `wait` the read keeps going until the frame
    /// closes or `timeout` runs out; without it only bytes already on the wire
    /// are taken.
    pub fn read(&mut self, timeout: Duration, wait: bool) -> Result<String, SmuError> {
        self.read_from(Instant::now(), timeout, wait)
    }
    /// Like [`read`](Self::read), but the deadline counts from `started`,
    /// normally the moment the command was written.
    pub(crate) fn read_from(
        &mut self,
        started: Instant,
        timeout: Duration,
        wait: bool,
    ) -> Result<String, SmuError> {
        let mut acc = FrameAccumulator::new(self.framing);
        let mut buf = [0u8; 256];
        loop {
            let n = self.link.receive(&mut buf)?;
            if n > 0 {
                acc.push(&buf[..n]);
            }
            if let FrameState::Framed(how) = acc.state() {
                debug!("rx {:?} ({how:?})", acc.partial());
                break;
            }
            if !wait && n == 0 {
                break;
            }
            if started.elapsed() > timeout {
                if !wait {
                    break;
                }
                acc.expire();
                return Err(SmuError::Timeout {
                    waited: started.elapsed(),
                    partial: acc.partial().to_owned(),
                });
            }
            if n == 0 {
                thread::sleep(self.poll_interval);
            }
        }
        Ok(acc.finish())
    }
}
