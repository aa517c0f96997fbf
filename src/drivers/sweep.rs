use std::thread;
use log::info;
use crate::config::{SweepPlan, Timing};
use crate::drivers::link::SerialLink;
use crate::drivers::session::InstrumentSession;
use crate::drivers::SmuError;
use crate::types::{IvCurve, MeasurementKind, SweepPoint};
/// Receives sweep results as they are taken.
pub trait SweepReporter {
    /// Called once per set-point, in sweep order.
    fn record(&mut self, point: &SweepPoint) -> Result<(), SmuError>;
    /// Called after the output has been switched off on a completed sweep.
    fn finish(&mut self, _curve: &IvCurve) -> Result<(), SmuError> {
        Ok(())
    }
}
impl SweepReporter for Vec<SweepPoint> {
    fn record(&mut self, point: &SweepPoint) -> Result<(), SmuError> {
        self.push(*point);
        Ok(())
    }
}
/// Steps the source through a plan and takes the median of repeated readings
/// at every step.
pub struct SweepController {
    plan: SweepPlan,
    timing: Timing,
}
impl SweepController {
    pub fn new(plan: SweepPlan, timing: Timing) -> Self {
        Self { plan, timing }
    }
    pub fn run<L, R>(
        &self,
        session: &mut InstrumentSession<L>,
        reporter: &mut R,
    ) -> Result<IvCurve, SmuError>
    where
        L: SerialLink,
        R: SweepReporter + ?Sized,
    {
        if self.plan.samples_per_point == 0 {
            return Err(SmuError::InvalidPlan(
                "samples_per_point must be at least 1".to_owned(),
            ));
        }
        let Some(&first) = self.plan.setpoints.first() else {
            info!("no set-points, nothing to sweep");
            return Ok(IvCurve::default());
        };
        session.configure(self.plan.compliance_amps)?;
        session.set_voltage(first)?;
        let mut sourcing = session.start_sourcing()?;
        // the first reading after output-on is off unless the source settles
        thread::sleep(self.timing.first_sample_delay());
        sourcing.set_voltage(first)?;
        let mut curve = IvCurve::default();
        for (step, &setpoint) in self.plan.setpoints.iter().enumerate() {
            if step > 0 {
                sourcing.set_voltage(setpoint)?;
            }
            thread::sleep(self.timing.stabilize());
            let point = self.sample(&mut *sourcing, setpoint)?;
            info!(
                "{setpoint:+.3} V: V={:e} I={:e} R={:e}",
                point.volts, point.amps, point.ohms
            );
            reporter.record(&point)?;
            curve.points.push(point);
        }
        sourcing.finish()?;
        reporter.finish(&curve)?;
        Ok(curve)
    }
    fn sample<L: SerialLink>(
        &self,
        session: &mut InstrumentSession<L>,
        setpoint: f64,
    ) -> Result<SweepPoint, SmuError> {
        Ok(SweepPoint {
            setpoint,
            volts: self.median_of(session, MeasurementKind::Voltage)?,
            amps: self.median_of(session, MeasurementKind::Current)?,
            ohms: self.median_of(session, MeasurementKind::Resistance)?,
        })
    }
    fn median_of<L: SerialLink>(
        &self,
        session: &mut InstrumentSession<L>,
        kind: MeasurementKind,
    ) -> Result<f64, SmuError> {
        let mut samples = (0..self.plan.samples_per_point)
            .map(|_| session.measure(kind))
            .collect::<Result<Vec<_>, _>>()?;
        median(&mut samples)
            .ok_or_else(|| SmuError::InvalidPlan("no samples taken".to_owned()))
    }
}
/// Median of `values`; the mean of the middle pair for even lengths.
/// Reorders `values`.
pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}
