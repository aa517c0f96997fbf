use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::Duration;
use log::debug;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use crate::config::ConnectionConfig;
use crate::drivers::SmuError;
/// Raw byte pipe to an instrument.
///
/// `receive` returns whatever happens to be available, which may be nothing
/// (`Ok(0)`) or only part of a message. Message boundaries are the channel's job.
pub trait SerialLink {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}
/// Hardware link over a real serial port.
pub struct PortLink {
    port: Box<dyn SerialPort>,
}
impl PortLink {
    /// Opens the port 8N1 with a very short read timeout so reads never block for long.
    pub fn open(config: &ConnectionConfig) -> Result<Self, SmuError> {
        let port = serialport::new(&config.port, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(1))
            .open()?;
        debug!("serial port '{}' opened at {} baud", config.port, config.baud_rate);
        Ok(Self { port })
    }
    pub fn name(&self) -> Option<String> {
        self.port.name()
    }
}
impl SerialLink for PortLink {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }
}
/// In-memory link that hands out pre-scripted chunks, one per read.
#[derive(Default)]
pub struct ManualLink {
    chunks: VecDeque<Vec<u8>>,
    written: Vec<u8>,
}
impl ManualLink {
    pub fn new<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: AsRef<[u8]>,
    {
        Self {
            chunks: chunks.into_iter().map(|c| c.as_ref().to_vec()).collect(),
            written: Vec::new(),
        }
    }
    pub fn written(&self) -> &[u8] {
        &self.written
    }
}
impl SerialLink for ManualLink {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.written.extend_from_slice(bytes);
        Ok(())
    }
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(mut chunk) = self.chunks.pop_front() else {
            return Ok(0);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            chunk.drain(..n);
            self.chunks.push_front(chunk);
        }
        Ok(n)
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn manual_link_splits_oversized_chunks() {
        let mut link = ManualLink::new(["abcdef"]);
        let mut buf = [0u8; 4];
        assert_eq!(link.receive(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(link.receive(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(link.receive(&mut buf).unwrap(), 0);
    }
    #[test]
    fn manual_link_records_writes() {
        let mut link = ManualLink::default();
        link.send(b"*IDN?\r").unwrap();
        link.send(b":OUTP OFF\r").unwrap();
        assert_eq!(link.written(), b"*IDN?\r:OUTP OFF\r");
    }
}
