//! APRS position and status payloads
//!
//! Handles the four plain position data types (`!`, `=`, `/`, `@`) in both
//! the human-readable `ddmm.hhN/dddmm.hhW` form and the base-91 compressed
//! form, plus `>` status reports. Timestamps are carried verbatim; APRS
//! stations disagree enough about zulu/local/DHM/HMS forms that
//! interpretation is left to the application.

use crate::error::AprsError;

/// A decoded position report
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PositionReport {
    /// Decimal degrees, positive north
    pub latitude: f64,
    /// Decimal degrees, positive east
    pub longitude: f64,
    pub symbol_table: char,
    pub symbol: char,
    /// Raw 7-character timestamp for `/` and `@` reports
    pub timestamp: Option<String>,
    /// True for `=` and `@` reports (station is message-capable)
    pub messaging: bool,
    pub course_degrees: Option<u16>,
    pub speed_knots: Option<f64>,
    pub comment: String,
}

impl PositionReport {
    /// Decode a `!`/`=`/`/`/`@` payload
    pub fn decode(payload: &[u8]) -> Result<Self, AprsError> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| AprsError::MalformedPayload("position is not ASCII".into()))?;
        let mut chars = text.chars();
        let ident = chars
            .next()
            .ok_or_else(|| AprsError::MalformedPayload("empty position".into()))?;

        let (has_timestamp, messaging) = match ident {
            '!' => (false, false),
            '=' => (false, true),
            '/' => (true, false),
            '@' => (true, true),
            other => {
                return Err(AprsError::MalformedPayload(format!(
                    "not a position identifier: {:?}",
                    other
                )))
            }
        };

        let mut rest = &text[1..];
        let timestamp = if has_timestamp {
            let (ts, tail) = match (rest.get(..7), rest.get(7..)) {
                (Some(ts), Some(tail)) => (ts, tail),
                _ => return Err(AprsError::MalformedPayload("timestamp too short".into())),
            };
            rest = tail;
            Some(ts.to_string())
        } else {
            None
        };

        if rest.starts_with(|c: char| c.is_ascii_digit() || c == ' ') {
            Self::decode_uncompressed(rest, timestamp, messaging)
        } else {
            Self::decode_compressed(rest, timestamp, messaging)
        }
    }

    /// `ddmm.hhN/dddmm.hhW$` followed by free-text comment
    fn decode_uncompressed(
        rest: &str,
        timestamp: Option<String>,
        messaging: bool,
    ) -> Result<Self, AprsError> {
        if rest.len() < 19 || !rest.as_bytes()[..19].is_ascii() {
            return Err(AprsError::MalformedPayload(
                "uncompressed position too short".into(),
            ));
        }
        let latitude = decode_sexagesimal(&rest[0..8], 2)?;
        let symbol_table = rest.as_bytes()[8] as char;
        let longitude = decode_sexagesimal(&rest[9..18], 3)?;
        let symbol = rest.as_bytes()[18] as char;

        Ok(Self {
            latitude,
            longitude,
            symbol_table,
            symbol,
            timestamp,
            messaging,
            course_degrees: None,
            speed_knots: None,
            comment: rest[19..].to_string(),
        })
    }

    /// `TYYYYXXXX$csC` with base-91 coordinates
    fn decode_compressed(
        rest: &str,
        timestamp: Option<String>,
        messaging: bool,
    ) -> Result<Self, AprsError> {
        if rest.len() < 13 || !rest.as_bytes()[..13].is_ascii() {
            return Err(AprsError::MalformedPayload(
                "compressed position too short".into(),
            ));
        }
        let bytes = rest.as_bytes();
        let symbol_table = bytes[0] as char;
        let latitude = 90.0 - base91(&bytes[1..5])? as f64 / 380_926.0;
        let longitude = -180.0 + base91(&bytes[5..9])? as f64 / 190_463.0;
        let symbol = bytes[9] as char;

        let (course_degrees, speed_knots) = match bytes[10] {
            b' ' => (None, None),
            c if (33..=122).contains(&c) && c != b'{' => {
                let course = u16::from(c - 33) * 4;
                let speed = 1.08f64.powi(i32::from(bytes[11] - 33)) - 1.0;
                (Some(course), Some(speed))
            }
            _ => (None, None),
        };

        Ok(Self {
            latitude,
            longitude,
            symbol_table,
            symbol,
            timestamp,
            messaging,
            course_degrees,
            speed_knots,
            comment: rest[13..].to_string(),
        })
    }

    /// Encode as an uncompressed report (`!` or `=` depending on
    /// `messaging`); timestamped forms are not emitted.
    pub fn encode_uncompressed(&self) -> Vec<u8> {
        let ident = if self.messaging { '=' } else { '!' };
        let (lat_deg, lat_min) = split_degrees(self.latitude.abs());
        let (lng_deg, lng_min) = split_degrees(self.longitude.abs());
        format!(
            "{}{:02}{:05.2}{}{}{:03}{:05.2}{}{}{}",
            ident,
            lat_deg,
            lat_min,
            if self.latitude < 0.0 { 'S' } else { 'N' },
            self.symbol_table,
            lng_deg,
            lng_min,
            if self.longitude < 0.0 { 'W' } else { 'E' },
            self.symbol,
            self.comment,
        )
        .into_bytes()
    }
}

/// A `>` status report
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatusReport {
    pub text: String,
}

impl StatusReport {
    pub fn decode(payload: &[u8]) -> Result<Self, AprsError> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| AprsError::MalformedPayload("status is not ASCII".into()))?;
        let text = text
            .strip_prefix('>')
            .ok_or_else(|| AprsError::MalformedPayload("not a status payload".into()))?;
        Ok(Self {
            text: text.to_string(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        format!(">{}", self.text).into_bytes()
    }
}

/// Decode `ddmm.hhN` / `dddmm.hhW`; spaces are position ambiguity and read
/// as zeroes.
fn decode_sexagesimal(s: &str, deg_digits: usize) -> Result<f64, AprsError> {
    let digits: String = s[..s.len() - 1].replace(' ', "0");
    let hemisphere = s
        .chars()
        .last()
        .ok_or_else(|| AprsError::MalformedPayload("empty coordinate".into()))?;

    let dot = deg_digits + 2;
    if digits.as_bytes().get(dot) != Some(&b'.') {
        return Err(AprsError::MalformedPayload(format!(
            "no decimal point in coordinate {:?}",
            s
        )));
    }

    let degrees: f64 = digits[..deg_digits]
        .parse()
        .map_err(|_| AprsError::MalformedPayload(format!("bad degrees in {:?}", s)))?;
    let minutes: f64 = digits[deg_digits..]
        .parse()
        .map_err(|_| AprsError::MalformedPayload(format!("bad minutes in {:?}", s)))?;
    if minutes >= 60.0 {
        return Err(AprsError::MalformedPayload(format!(
            "minutes out of range in {:?}",
            s
        )));
    }

    let value = degrees + minutes / 60.0;
    match hemisphere {
        'N' | 'E' => Ok(value),
        'S' | 'W' => Ok(-value),
        other => Err(AprsError::MalformedPayload(format!(
            "unknown hemisphere {:?}",
            other
        ))),
    }
}

fn split_degrees(value: f64) -> (u16, f64) {
    let degrees = value.floor();
    (degrees as u16, (value - degrees) * 60.0)
}

/// Decode big-endian base-91 digits (printable ASCII offset 33)
fn base91(digits: &[u8]) -> Result<u32, AprsError> {
    let mut value: u32 = 0;
    for &d in digits {
        if !(33..=124).contains(&d) {
            return Err(AprsError::MalformedPayload(format!(
                "invalid base-91 digit 0x{:02X}",
                d
            )));
        }
        value = value * 91 + u32::from(d - 33);
    }
    Ok(value)
}
