//! MIC-E position decoder
//!
//! MIC-E packs a full position report into the destination callsign plus a
//! handful of payload bytes. The destination's six characters each carry one
//! latitude digit along with a message bit, the N/S and E/W indicators and a
//! +100 degree longitude offset flag; the payload carries the longitude,
//! speed, course and symbol. See APRS 1.01 chapter 10.
//!
//! Decode only: this stack never originates MIC-E traffic.

use crate::callsign::Callsign;
use crate::error::AprsError;

/// MIC-E position comment / message type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MicEMessage {
    Emergency,
    Priority,
    Special,
    Committed,
    Returning,
    InService,
    EnRoute,
    OffDuty,
    /// Custom message C1-C7
    Custom(u8),
    /// Standard and custom bits mixed; meaning undefined
    Unknown,
}

impl MicEMessage {
    fn from_bits(standard: u8, custom: u8) -> Self {
        match (standard, custom) {
            (bits, 0) => match bits {
                0b000 => Self::Emergency,
                0b001 => Self::Priority,
                0b010 => Self::Special,
                0b011 => Self::Committed,
                0b100 => Self::Returning,
                0b101 => Self::InService,
                0b110 => Self::EnRoute,
                _ => Self::OffDuty,
            },
            (0, bits) => Self::Custom(bits),
            _ => Self::Unknown,
        }
    }
}

/// A decoded MIC-E report
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MicEReport {
    /// Decimal degrees, positive north
    pub latitude: f64,
    /// Decimal degrees, positive east
    pub longitude: f64,
    pub speed_knots: f64,
    pub course_degrees: u16,
    pub message: MicEMessage,
    pub symbol_table: char,
    pub symbol: char,
    /// Trailing status text / telemetry, verbatim
    pub comment: Vec<u8>,
}

struct DestChar {
    digit: u8,
    standard: bool,
    custom: bool,
    /// N/S, E/W and longitude-offset indicator ("P-Z" half of the table)
    indicator: bool,
}

fn decode_dest_char(c: u8) -> Result<DestChar, AprsError> {
    match c {
        b'0'..=b'9' => Ok(DestChar {
            digit: c - b'0',
            standard: false,
            custom: false,
            indicator: false,
        }),
        b'A'..=b'J' => Ok(DestChar {
            digit: c - b'A',
            standard: false,
            custom: true,
            indicator: false,
        }),
        b'K' => Ok(DestChar {
            digit: 0,
            standard: false,
            custom: true,
            indicator: false,
        }),
        b'L' => Ok(DestChar {
            digit: 0,
            standard: false,
            custom: false,
            indicator: false,
        }),
        b'P'..=b'Y' => Ok(DestChar {
            digit: c - b'P',
            standard: true,
            custom: false,
            indicator: true,
        }),
        b'Z' => Ok(DestChar {
            digit: 0,
            standard: true,
            custom: false,
            indicator: true,
        }),
        other => Err(AprsError::MalformedPayload(format!(
            "invalid MIC-E destination character {:?}",
            other as char
        ))),
    }
}

impl MicEReport {
    /// Decode from the frame's destination address and UI payload
    pub fn decode(destination: &Callsign, payload: &[u8]) -> Result<Self, AprsError> {
        let dest = destination.base().as_bytes();
        if dest.len() != 6 {
            return Err(AprsError::MalformedPayload(
                "MIC-E destination must be six characters".into(),
            ));
        }
        // Type byte, six position/speed bytes, symbol and table
        if payload.len() < 9 {
            return Err(AprsError::MalformedPayload("MIC-E payload too short".into()));
        }

        let chars: Vec<DestChar> = dest
            .iter()
            .map(|&c| decode_dest_char(c))
            .collect::<Result<_, _>>()?;

        let mut standard = 0u8;
        let mut custom = 0u8;
        for ch in &chars[0..3] {
            standard = (standard << 1) | ch.standard as u8;
            custom = (custom << 1) | ch.custom as u8;
        }
        let message = MicEMessage::from_bits(standard, custom);

        let digit = |i: usize| f64::from(chars[i].digit);
        let lat_degrees = digit(0) * 10.0 + digit(1);
        let lat_minutes = digit(2) * 10.0 + digit(3) + (digit(4) * 10.0 + digit(5)) / 100.0;
        let mut latitude = lat_degrees + lat_minutes / 60.0;
        if !chars[3].indicator {
            latitude = -latitude;
        }

        let body = &payload[1..];
        let sub28 = |b: u8| i32::from(b) - 28;

        let mut lng_degrees = sub28(body[0]);
        if chars[4].indicator {
            lng_degrees += 100;
        }
        if (180..=189).contains(&lng_degrees) {
            lng_degrees -= 80;
        } else if (190..=199).contains(&lng_degrees) {
            lng_degrees -= 190;
        }
        let mut lng_minutes = sub28(body[1]);
        if lng_minutes >= 60 {
            lng_minutes -= 60;
        }
        let lng_hundredths = sub28(body[2]);
        if !(0..=179).contains(&lng_degrees)
            || !(0..=59).contains(&lng_minutes)
            || !(0..=99).contains(&lng_hundredths)
        {
            return Err(AprsError::MalformedPayload(
                "MIC-E longitude out of range".into(),
            ));
        }
        let mut longitude = f64::from(lng_degrees)
            + (f64::from(lng_minutes) + f64::from(lng_hundredths) / 100.0) / 60.0;
        if chars[5].indicator {
            longitude = -longitude;
        }

        let sp = sub28(body[3]);
        let dc = sub28(body[4]);
        let se = sub28(body[5]);
        if sp < 0 || dc < 0 || se < 0 {
            return Err(AprsError::MalformedPayload(
                "MIC-E speed/course out of range".into(),
            ));
        }
        let mut speed = f64::from(sp * 10 + dc / 10);
        let mut course = dc % 10 * 100 + se;
        if speed >= 800.0 {
            speed -= 800.0;
        }
        if course >= 400 {
            course -= 400;
        }

        Ok(Self {
            latitude,
            longitude,
            speed_knots: speed,
            course_degrees: course as u16,
            message,
            symbol_table: body[7] as char,
            symbol: body[6] as char,
            comment: body[8..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 49 03.50' N, 72 01.75' W, 36 knots on course 074, "En Route",
    // symbol '>' on table '/'
    fn fixture() -> (Callsign, Vec<u8>) {
        let dest = Callsign::new("TY0S5P", 0).unwrap();
        let payload = vec![b'`', 100, 29, 103, 31, 88, 102, b'>', b'/'];
        (dest, payload)
    }

    #[test]
    fn test_decode_position() {
        let (dest, payload) = fixture();
        let report = MicEReport::decode(&dest, &payload).unwrap();
        assert!((report.latitude - 49.058_333).abs() < 1e-4);
        assert!((report.longitude + 72.029_167).abs() < 1e-4);
        assert_eq!(report.symbol, '>');
        assert_eq!(report.symbol_table, '/');
        assert!(report.comment.is_empty());
    }

    #[test]
    fn test_decode_speed_course_message() {
        let (dest, payload) = fixture();
        let report = MicEReport::decode(&dest, &payload).unwrap();
        assert_eq!(report.speed_knots, 36.0);
        assert_eq!(report.course_degrees, 74);
        assert_eq!(report.message, MicEMessage::EnRoute);
    }

    #[test]
    fn test_southern_eastern_hemisphere() {
        // Same digits with the lat/long indicators in the "0-9" half
        let dest = Callsign::new("TY0350", 0).unwrap();
        let (_, payload) = fixture();
        let report = MicEReport::decode(&dest, &payload).unwrap();
        assert!(report.latitude < 0.0);
        assert!(report.longitude > 0.0);
    }

    #[test]
    fn test_longitude_offset() {
        // Offset indicator set: 72 becomes 172 degrees
        let dest = Callsign::new("TY0SWP", 0).unwrap();
        let (_, payload) = fixture();
        let report = MicEReport::decode(&dest, &payload).unwrap();
        assert!((report.longitude + 172.029_167).abs() < 1e-4);
    }

    #[test]
    fn test_comment_preserved() {
        let (dest, mut payload) = fixture();
        payload.extend_from_slice(b"]static");
        let report = MicEReport::decode(&dest, &payload).unwrap();
        assert_eq!(report.comment, b"]static");
    }

    #[test]
    fn test_rejects_short_payload() {
        let (dest, _) = fixture();
        assert!(MicEReport::decode(&dest, b"`abc").is_err());
    }

    #[test]
    fn test_rejects_bad_destination() {
        let dest = Callsign::new("APZAIO", 0).unwrap();
        let (_, payload) = fixture();
        // 'O' is outside every MIC-E digit range
        assert!(MicEReport::decode(&dest, &payload).is_err());
    }
}
