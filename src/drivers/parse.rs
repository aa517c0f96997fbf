//! Response text to typed values. All numeric parsing goes through
//! `f64::from_str`/`i32::from_str`, which do not depend on locale.
use crate::drivers::SmuError;
use crate::types::{ErrorStatus, Identity, VirTriple};
/// Parses `V,I,R[,...]`. The K2401 sometimes appends two more fields; only
/// the first three mean anything.
pub fn parse_triple(raw: &str) -> Result<VirTriple, SmuError> {
    let mut fields = raw.trim().split(',');
    let mut next = || -> Result<f64, SmuError> {
        let field = fields
            .next()
            .ok_or_else(|| SmuError::parse("V,I,R triple", raw))?;
        parse_finite(field).ok_or_else(|| SmuError::parse("V,I,R triple", raw))
    };
    Ok(VirTriple {
        volts: next()?,
        amps: next()?,
        ohms: next()?,
    })
}
fn parse_finite(field: &str) -> Option<f64> {
    field.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}
/// Parses an error queue entry such as `-113,"Undefined header"`.
pub fn parse_error_status(raw: &str) -> Result<ErrorStatus, SmuError> {
    let (code, message) = raw
        .trim()
        .split_once(',')
        .ok_or_else(|| SmuError::parse("error status", raw))?;
    let code = code
        .trim()
        .parse::<i32>()
        .map_err(|_| SmuError::parse("error status", raw))?;
    let message = message.trim();
    let message = message
        .strip_prefix('"')
        .and_then(|m| m.strip_suffix('"'))
        .unwrap_or(message);
    Ok(ErrorStatus {
        code,
        message: message.to_owned(),
    })
}
/// Parses the `*IDN?` reply. Firmware strings may contain commas of their own,
/// so everything after the third comma is kept as the firmware field.
pub fn parse_identity(raw: &str, begin: char) -> Result<Identity, SmuError> {
    let text = raw.trim();
    let text = text.strip_prefix(begin).unwrap_or(text);
    let fields: Vec<&str> = text.splitn(4, ',').map(str::trim).collect();
    let [vendor, model, serial, firmware] = fields[..] else {
        return Err(SmuError::parse("identity", raw));
    };
    Ok(Identity {
        vendor: vendor.to_owned(),
        model: model.to_owned(),
        serial: serial.to_owned(),
        firmware: firmware.to_owned(),
    })
}
