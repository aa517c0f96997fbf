use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use log::info;
use crate::drivers::{SmuError, SweepReporter};
use crate::types::{IvCurve, SweepPoint};

/// Writes sweep points as `v,i,r` CSV, flushing after every row so a crash
/// loses at most the point being written.
pub struct CsvRecorder<W: Write> {
    writer: W,
    rows: usize,
}

impl CsvRecorder<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SmuError> {
        let path = path.as_ref();
        let recorder = Self::new(BufWriter::new(File::create(path)?))?;
        info!("recording to {}", path.display());
        Ok(recorder)
    }
}

impl<W: Write> CsvRecorder<W> {
    pub fn new(mut writer: W) -> Result<Self, SmuError> {
        writeln!(writer, "v,i,r")?;
        writer.flush()?;
        Ok(Self { writer, rows: 0 })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> SweepReporter for CsvRecorder<W> {
    fn record(&mut self, point: &SweepPoint) -> Result<(), SmuError> {
        writeln!(
            self.writer,
            "{},{},{}",
            format_value(point.volts),
            format_value(point.amps),
            format_value(point.ohms)
        )?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    fn finish(&mut self, curve: &IvCurve) -> Result<(), SmuError> {
        self.writer.flush()?;
        info!("💾 {} points saved.", curve.len());
        Ok(())
    }
}

// Plain decimals in the everyday range, exponent form for overflow readings
// and tiny currents.
fn format_value(value: f64) -> String {
    let magnitude = value.abs();
    if value != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        format!("{value:e}")
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(volts: f64, amps: f64, ohms: f64) -> SweepPoint {
        SweepPoint {
            setpoint: volts,
            volts,
            amps,
            ohms,
        }
    }

    #[test]
    fn writes_header_then_one_row_per_point() {
        let mut rec = CsvRecorder::new(Vec::new()).unwrap();
        rec.record(&point(0.0, 0.0, 9.9e37)).unwrap();
        rec.record(&point(1.0, 0.01, 100.0)).unwrap();
        rec.record(&point(-0.5, -1.542443e-6, 324160.0)).unwrap();
        assert_eq!(rec.rows(), 3);
        let text = String::from_utf8(rec.into_inner()).unwrap();
        assert_eq!(
            text,
            "v,i,r\n0,0,9.9e37\n1,0.01,100\n-0.5,-1.542443e-6,324160\n"
        );
    }

    #[test]
    fn file_rows_are_on_disk_before_finish() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep.csv");
        let mut rec = CsvRecorder::create(&path).unwrap();
        rec.record(&point(1.0, 0.01, 100.0)).unwrap();
        let on_disk = std::fs::read_to_string(&path).unwrap();
        assert_eq!(on_disk, "v,i,r\n1,0.01,100\n");
    }
}
