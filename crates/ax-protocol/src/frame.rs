//! AX.25 frame codec
//!
//! Frame layout on the wire:
//!
//! ```text
//! DEST(7) SRC(7) DIGI*(7 each, last marked) CONTROL(1-2) [PID(1)] PAYLOAD FCS(2)
//! ```
//!
//! The control field selects the frame variant from its low bits:
//! `xxxxxxx0` information, `xxxxxx01` supervisory, `xxxxxx11` unnumbered.
//! Supervisory and information frames use two control octets when the link
//! runs modulo-128; unnumbered frames always use one. The FCS is
//! CRC-16/X.25 over every preceding octet, transmitted low byte first.
//!
//! Decoding is tolerant of payload bytes on any variant so that every
//! accepted input round-trips byte-exactly through [`Ax25Frame::encode`].

use std::fmt;

use crate::callsign::{Callsign, Path};
use crate::error::FrameError;
use crate::fcs::crc16_x25;

/// PID value for traffic with no layer-3 protocol (used by APRS)
pub const PID_NO_LAYER3: u8 = 0xF0;

const POLL_FINAL: u8 = 0b0001_0000;
const U_MODIFIER_MASK: u8 = 0b1110_1111;

/// Control-field sequence numbering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Modulo {
    Mod8,
    Mod128,
}

/// Unnumbered frame subtypes other than UI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UFrameType {
    Sabm,
    Sabme,
    Disc,
    Dm,
    Ua,
    Frmr,
    Xid,
    Test,
}

impl UFrameType {
    fn modifier(self) -> u8 {
        match self {
            UFrameType::Sabm => 0x2F,
            UFrameType::Sabme => 0x6F,
            UFrameType::Disc => 0x43,
            UFrameType::Dm => 0x0F,
            UFrameType::Ua => 0x63,
            UFrameType::Frmr => 0x87,
            UFrameType::Xid => 0xAF,
            UFrameType::Test => 0xE3,
        }
    }

    fn from_modifier(modifier: u8) -> Option<Self> {
        match modifier {
            0x2F => Some(UFrameType::Sabm),
            0x6F => Some(UFrameType::Sabme),
            0x43 => Some(UFrameType::Disc),
            0x0F => Some(UFrameType::Dm),
            0x63 => Some(UFrameType::Ua),
            0x87 => Some(UFrameType::Frmr),
            0xAF => Some(UFrameType::Xid),
            0xE3 => Some(UFrameType::Test),
            _ => None,
        }
    }
}

/// Supervisory frame subtypes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SFrameType {
    Rr,
    Rnr,
    Rej,
    Srej,
}

impl SFrameType {
    fn code(self) -> u8 {
        match self {
            SFrameType::Rr => 0,
            SFrameType::Rnr => 1,
            SFrameType::Rej => 2,
            SFrameType::Srej => 3,
        }
    }

    fn from_code(code: u8) -> Self {
        match code & 0x03 {
            0 => SFrameType::Rr,
            1 => SFrameType::Rnr,
            2 => SFrameType::Rej,
            _ => SFrameType::Srej,
        }
    }
}

/// Decoded control field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Control {
    /// Unnumbered information frame
    Ui { pf: bool },
    /// Unnumbered frame other than UI
    Unnumbered { subtype: UFrameType, pf: bool },
    /// Supervisory frame
    Supervisory {
        subtype: SFrameType,
        nr: u8,
        pf: bool,
        modulo: Modulo,
    },
    /// Information frame
    Information {
        nr: u8,
        ns: u8,
        pf: bool,
        modulo: Modulo,
    },
}

impl Control {
    /// Whether a PID octet follows the control field for this variant
    pub fn has_pid(&self) -> bool {
        matches!(self, Control::Ui { .. } | Control::Information { .. })
    }

    fn encode(&self, out: &mut Vec<u8>) {
        match *self {
            Control::Ui { pf } => {
                out.push(0x03 | if pf { POLL_FINAL } else { 0 });
            }
            Control::Unnumbered { subtype, pf } => {
                out.push(subtype.modifier() | if pf { POLL_FINAL } else { 0 });
            }
            Control::Supervisory {
                subtype,
                nr,
                pf,
                modulo,
            } => match modulo {
                Modulo::Mod8 => {
                    let mut c = 0x01 | (subtype.code() << 2) | ((nr & 0x07) << 5);
                    if pf {
                        c |= POLL_FINAL;
                    }
                    out.push(c);
                }
                Modulo::Mod128 => {
                    out.push(0x01 | (subtype.code() << 2));
                    out.push(((nr & 0x7F) << 1) | pf as u8);
                }
            },
            Control::Information { nr, ns, pf, modulo } => match modulo {
                Modulo::Mod8 => {
                    let mut c = ((ns & 0x07) << 1) | ((nr & 0x07) << 5);
                    if pf {
                        c |= POLL_FINAL;
                    }
                    out.push(c);
                }
                Modulo::Mod128 => {
                    out.push((ns & 0x7F) << 1);
                    out.push(((nr & 0x7F) << 1) | pf as u8);
                }
            },
        }
    }

    /// Decode a control field from the head of `data`; returns the control
    /// and the number of octets consumed.
    fn decode(data: &[u8], modulo: Modulo) -> Result<(Self, usize), FrameError> {
        let first = *data.first().ok_or(FrameError::Truncated { needed: 1 })?;

        if first & 0x01 == 0 {
            // Information frame
            match modulo {
                Modulo::Mod8 => Ok((
                    Control::Information {
                        ns: (first >> 1) & 0x07,
                        nr: (first >> 5) & 0x07,
                        pf: first & POLL_FINAL != 0,
                        modulo,
                    },
                    1,
                )),
                Modulo::Mod128 => {
                    let second = *data.get(1).ok_or(FrameError::Truncated { needed: 1 })?;
                    Ok((
                        Control::Information {
                            ns: first >> 1,
                            nr: second >> 1,
                            pf: second & 0x01 != 0,
                            modulo,
                        },
                        2,
                    ))
                }
            }
        } else if first & 0x03 == 0x01 {
            // Supervisory frame
            let subtype = SFrameType::from_code(first >> 2);
            match modulo {
                Modulo::Mod8 => Ok((
                    Control::Supervisory {
                        subtype,
                        nr: (first >> 5) & 0x07,
                        pf: first & POLL_FINAL != 0,
                        modulo,
                    },
                    1,
                )),
                Modulo::Mod128 => {
                    let second = *data.get(1).ok_or(FrameError::Truncated { needed: 1 })?;
                    Ok((
                        Control::Supervisory {
                            subtype,
                            nr: second >> 1,
                            pf: second & 0x01 != 0,
                            modulo,
                        },
                        2,
                    ))
                }
            }
        } else {
            // Unnumbered frame, always a single octet
            let pf = first & POLL_FINAL != 0;
            let modifier = first & U_MODIFIER_MASK;
            if modifier == 0x03 {
                Ok((Control::Ui { pf }, 1))
            } else if let Some(subtype) = UFrameType::from_modifier(modifier) {
                Ok((Control::Unnumbered { subtype, pf }, 1))
            } else {
                Err(FrameError::UnknownVariant(first))
            }
        }
    }
}

/// A decoded AX.25 frame
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Ax25Frame {
    pub path: Path,
    pub control: Control,
    /// Protocol identifier; present on UI and I frames
    pub pid: Option<u8>,
    pub payload: Vec<u8>,
}

impl Ax25Frame {
    /// Build a UI frame
    pub fn ui(
        destination: Callsign,
        source: Callsign,
        digipeaters: Vec<Callsign>,
        pid: u8,
        payload: Vec<u8>,
    ) -> Result<Self, FrameError> {
        Ok(Self {
            path: Path::new(destination, source, digipeaters)?,
            control: Control::Ui { pf: false },
            pid: Some(pid),
            payload,
        })
    }

    /// Whether this is an unnumbered information frame
    pub fn is_ui(&self) -> bool {
        matches!(self.control, Control::Ui { .. })
    }

    /// Serialize the frame, appending the FCS
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.payload.len() + 7 * self.path.digipeaters.len());
        self.path.encode(&mut out);
        self.control.encode(&mut out);
        if self.control.has_pid() {
            out.push(self.pid.unwrap_or(PID_NO_LAYER3));
        }
        out.extend_from_slice(&self.payload);

        let fcs = crc16_x25(&out);
        out.push((fcs & 0xFF) as u8);
        out.push((fcs >> 8) as u8);
        out
    }

    /// Decode a frame with modulo-8 control fields
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        Self::decode_with_modulo(data, Modulo::Mod8)
    }

    /// Decode a frame, selecting the control-field width for S/I frames
    pub fn decode_with_modulo(data: &[u8], modulo: Modulo) -> Result<Self, FrameError> {
        // Smallest frame: two addresses, one control octet, FCS
        const MIN_LEN: usize = 14 + 1 + 2;
        if data.len() < MIN_LEN {
            return Err(FrameError::Truncated {
                needed: MIN_LEN - data.len(),
            });
        }

        let (body, fcs_bytes) = data.split_at(data.len() - 2);
        let expected = crc16_x25(body);
        let actual = u16::from(fcs_bytes[0]) | (u16::from(fcs_bytes[1]) << 8);
        if expected != actual {
            return Err(FrameError::BadFcs { expected, actual });
        }

        let (path, consumed) = Path::decode(body)?;
        let rest = &body[consumed..];
        let (control, ctrl_len) = Control::decode(rest, modulo)?;
        let mut rest = &rest[ctrl_len..];

        let pid = if control.has_pid() {
            let pid = *rest.first().ok_or(FrameError::Truncated { needed: 1 })?;
            rest = &rest[1..];
            Some(pid)
        } else {
            None
        };

        Ok(Self {
            path,
            control,
            pid,
            payload: rest.to_vec(),
        })
    }
}

impl fmt::Display for Ax25Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)?;
        match self.control {
            Control::Ui { .. } => {
                write!(f, ":{}", String::from_utf8_lossy(&self.payload))
            }
            other => write!(f, " {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // APZAIO < VK4MSL-9, control 0x03, PID 0xF0, "Hello", FCS 0xF06D
    const UI_FIXTURE: &[u8] = &[
        0x82, 0xA0, 0xB4, 0x82, 0x92, 0x9E, 0x60, 0xAC, 0x96, 0x68, 0x9A, 0xA6, 0x98, 0x73, 0x03,
        0xF0, 0x48, 0x65, 0x6C, 0x6C, 0x6F, 0x6D, 0xF0,
    ];

    fn ui_fixture_frame() -> Ax25Frame {
        Ax25Frame::ui(
            "APZAIO".parse().unwrap(),
            "VK4MSL-9".parse().unwrap(),
            Vec::new(),
            PID_NO_LAYER3,
            b"Hello".to_vec(),
        )
        .unwrap()
    }

    #[test]
    fn test_encode_ui() {
        assert_eq!(ui_fixture_frame().encode(), UI_FIXTURE);
    }

    #[test]
    fn test_decode_ui() {
        let frame = Ax25Frame::decode(UI_FIXTURE).unwrap();
        assert!(frame.is_ui());
        assert_eq!(frame.path.destination.base(), "APZAIO");
        assert_eq!(frame.path.source.base(), "VK4MSL");
        assert_eq!(frame.path.source.ssid(), 9);
        assert_eq!(frame.pid, Some(PID_NO_LAYER3));
        assert_eq!(frame.payload, b"Hello");
        assert_eq!(frame, ui_fixture_frame());
    }

    #[test]
    fn test_exact_byte_round_trip() {
        // Frame with digipeaters, one already repeated
        let raw: &[u8] = &[
            0x82, 0xA0, 0xB4, 0x82, 0x92, 0x9E, 0x60, 0xAC, 0x96, 0x68, 0x82, 0x84, 0x86, 0x60,
            0xAC, 0x96, 0x68, 0xA4, 0xB4, 0x84, 0x60, 0xAC, 0x96, 0x68, 0xA4, 0xB4, 0x82, 0xE1,
            0x03, 0xF0, 0x3A, 0x56, 0x4B, 0x34, 0x4D, 0x53, 0x4C, 0x2D, 0x39, 0x20, 0x3A, 0x48,
            0x69, 0x7B, 0x32, 0x33, 0xED, 0xCA,
        ];
        let frame = Ax25Frame::decode(raw).unwrap();
        assert_eq!(frame.path.digipeaters.len(), 2);
        assert!(frame.path.digipeaters[1].ch());
        assert_eq!(frame.encode(), raw);
    }

    #[test]
    fn test_bad_fcs() {
        let mut data = UI_FIXTURE.to_vec();
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        assert!(matches!(
            Ax25Frame::decode(&data),
            Err(FrameError::BadFcs { .. })
        ));
    }

    #[test]
    fn test_truncated() {
        assert!(matches!(
            Ax25Frame::decode(&UI_FIXTURE[..10]),
            Err(FrameError::Truncated { .. })
        ));
    }

    #[test]
    fn test_decode_supervisory() {
        // RR with N(R)=5, P/F set: control 0xB1
        let raw: &[u8] = &[
            0xAC, 0x96, 0x68, 0x9A, 0xA6, 0x98, 0x60, 0xAC, 0x96, 0x68, 0x82, 0x84, 0x86, 0x61,
            0xB1, 0x0C, 0xE6,
        ];
        let frame = Ax25Frame::decode(raw).unwrap();
        assert_eq!(
            frame.control,
            Control::Supervisory {
                subtype: SFrameType::Rr,
                nr: 5,
                pf: true,
                modulo: Modulo::Mod8,
            }
        );
        assert_eq!(frame.pid, None);
        assert!(frame.payload.is_empty());
        assert_eq!(frame.encode(), raw);
    }

    #[test]
    fn test_decode_sabm_preserves_pf() {
        // SABM with P set: control 0x3F
        let raw: &[u8] = &[
            0xAC, 0x96, 0x68, 0x9A, 0xA6, 0x98, 0x60, 0xAC, 0x96, 0x68, 0x82, 0x84, 0x86, 0x61,
            0x3F, 0x7A, 0x8B,
        ];
        let frame = Ax25Frame::decode(raw).unwrap();
        assert_eq!(
            frame.control,
            Control::Unnumbered {
                subtype: UFrameType::Sabm,
                pf: true,
            }
        );
        assert_eq!(frame.encode(), raw);
    }

    #[test]
    fn test_decode_information_mod8() {
        // I frame N(S)=3 N(R)=5 P: control 0xB6
        let raw: &[u8] = &[
            0xAC, 0x96, 0x68, 0x9A, 0xA6, 0x98, 0x60, 0xAC, 0x96, 0x68, 0x82, 0x84, 0x86, 0x61,
            0xB6, 0xF0, 0x44, 0x41, 0x54, 0x41, 0xCB, 0x1B,
        ];
        let frame = Ax25Frame::decode(raw).unwrap();
        assert_eq!(
            frame.control,
            Control::Information {
                nr: 5,
                ns: 3,
                pf: true,
                modulo: Modulo::Mod8,
            }
        );
        assert_eq!(frame.pid, Some(0xF0));
        assert_eq!(frame.payload, b"DATA");
        assert_eq!(frame.encode(), raw);
    }

    #[test]
    fn test_mod128_control_round_trip() {
        let frame = Ax25Frame {
            path: Path::new(
                "VK4MSL".parse().unwrap(),
                "VK4ABC".parse().unwrap(),
                Vec::new(),
            )
            .unwrap(),
            control: Control::Information {
                nr: 101,
                ns: 37,
                pf: true,
                modulo: Modulo::Mod128,
            },
            pid: Some(PID_NO_LAYER3),
            payload: b"x".to_vec(),
        };
        let encoded = frame.encode();
        let decoded = Ax25Frame::decode_with_modulo(&encoded, Modulo::Mod128).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_unknown_u_modifier() {
        // Control 0x23 has U-frame low bits but no defined modifier
        let mut body = Vec::new();
        Path::new(
            "VK4MSL".parse().unwrap(),
            "VK4ABC".parse().unwrap(),
            Vec::new(),
        )
        .unwrap()
        .encode(&mut body);
        body.push(0x23);
        let fcs = crate::fcs::crc16_x25(&body);
        body.push((fcs & 0xFF) as u8);
        body.push((fcs >> 8) as u8);

        assert!(matches!(
            Ax25Frame::decode(&body),
            Err(FrameError::UnknownVariant(0x23))
        ));
    }
}
