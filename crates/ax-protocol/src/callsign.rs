//! AX.25 addresses and address paths
//!
//! An AX.25 address is a callsign of up to six uppercase alphanumerics plus a
//! 4-bit SSID. On the wire each address occupies seven octets: the callsign
//! characters shifted left one bit, then an SSID octet laid out as
//! `C R R S S I D E` where `C` is the command/has-been-repeated bit, `R` are
//! reserved bits (set by default) and `E` marks the last address of the path.
//!
//! Equality and hashing consider only the callsign and SSID; the flag bits
//! are routing metadata and round-trip through the codec untouched.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::FrameError;

/// Number of octets an address occupies on the wire
pub const ADDRESS_LEN: usize = 7;

/// Maximum number of digipeaters in a path
pub const MAX_DIGIPEATERS: usize = 8;

/// An AX.25 address: callsign, SSID and flag bits
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Callsign {
    base: String,
    ssid: u8,
    ch: bool,
    res0: bool,
    res1: bool,
}

impl Callsign {
    /// Create a new address with clear C/H bit and reserved bits set
    pub fn new(base: &str, ssid: u8) -> Result<Self, FrameError> {
        if base.is_empty() || base.len() > 6 {
            return Err(FrameError::MalformedCallsign(base.to_string()));
        }
        if !base.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(FrameError::MalformedCallsign(base.to_string()));
        }
        if ssid > 15 {
            return Err(FrameError::MalformedCallsign(format!("{}-{}", base, ssid)));
        }

        Ok(Self {
            base: base.to_ascii_uppercase(),
            ssid,
            ch: false,
            res0: true,
            res1: true,
        })
    }

    /// The callsign text, without SSID
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Secondary station identifier (0-15)
    pub fn ssid(&self) -> u8 {
        self.ssid
    }

    /// Command / has-been-repeated bit
    pub fn ch(&self) -> bool {
        self.ch
    }

    /// Return a copy with the C/H bit set as given
    pub fn with_ch(&self, ch: bool) -> Self {
        Self { ch, ..self.clone() }
    }

    /// Return a copy with the given SSID
    pub fn with_ssid(&self, ssid: u8) -> Self {
        Self {
            ssid: ssid & 0x0F,
            ..self.clone()
        }
    }

    /// Encode to the 7-octet wire form
    ///
    /// The low "last address" bit is owned by [`Path::encode`]; it is set
    /// here only when `last` is given.
    pub fn encode(&self, last: bool) -> [u8; ADDRESS_LEN] {
        let mut out = [b' ' << 1; ADDRESS_LEN];
        for (i, ch) in self.base.bytes().take(6).enumerate() {
            out[i] = ch << 1;
        }

        let mut ssid = (self.ssid & 0x0F) << 1;
        if self.res0 {
            ssid |= 0b0010_0000;
        }
        if self.res1 {
            ssid |= 0b0100_0000;
        }
        if self.ch {
            ssid |= 0b1000_0000;
        }
        if last {
            ssid |= 0b0000_0001;
        }
        out[6] = ssid;
        out
    }

    /// Decode a 7-octet wire address; returns the address and whether the
    /// "last address" bit was set.
    pub fn decode(data: &[u8]) -> Result<(Self, bool), FrameError> {
        if data.len() < ADDRESS_LEN {
            return Err(FrameError::Truncated {
                needed: ADDRESS_LEN - data.len(),
            });
        }

        let mut base = String::with_capacity(6);
        for &b in &data[0..6] {
            let ch = b >> 1;
            if ch == b' ' {
                break;
            }
            if !ch.is_ascii_alphanumeric() {
                return Err(FrameError::MalformedCallsign(format!(
                    "invalid character 0x{:02X}",
                    ch
                )));
            }
            base.push(ch.to_ascii_uppercase() as char);
        }
        if base.is_empty() {
            return Err(FrameError::MalformedCallsign("empty callsign".into()));
        }

        let ssid_byte = data[6];
        let callsign = Self {
            base,
            ssid: (ssid_byte >> 1) & 0x0F,
            ch: ssid_byte & 0b1000_0000 != 0,
            res1: ssid_byte & 0b0100_0000 != 0,
            res0: ssid_byte & 0b0010_0000 != 0,
        };
        Ok((callsign, ssid_byte & 0x01 != 0))
    }
}

impl FromStr for Callsign {
    type Err = FrameError;

    /// Parse `BASE[-SSID][*]`; a trailing `*` sets the C/H bit.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (s, ch) = match s.strip_suffix('*') {
            Some(rest) => (rest, true),
            None => (s, false),
        };

        let (base, ssid) = match s.split_once('-') {
            Some((base, ssid)) => {
                let ssid: u8 = ssid
                    .parse()
                    .map_err(|_| FrameError::MalformedCallsign(s.to_string()))?;
                (base, ssid)
            }
            None => (s, 0),
        };

        let mut callsign = Callsign::new(base, ssid)?;
        callsign.ch = ch;
        Ok(callsign)
    }
}

impl fmt::Display for Callsign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base)?;
        if self.ssid > 0 {
            write!(f, "-{}", self.ssid)?;
        }
        if self.ch {
            write!(f, "*")?;
        }
        Ok(())
    }
}

impl PartialEq for Callsign {
    fn eq(&self, other: &Self) -> bool {
        self.base == other.base && self.ssid == other.ssid
    }
}

impl Eq for Callsign {}

impl Hash for Callsign {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.base.hash(state);
        self.ssid.hash(state);
    }
}

/// An ordered address path: destination, source, then up to eight digipeaters
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Path {
    pub destination: Callsign,
    pub source: Callsign,
    pub digipeaters: Vec<Callsign>,
}

impl Path {
    /// Build a path, rejecting more than [`MAX_DIGIPEATERS`] digipeaters
    pub fn new(
        destination: Callsign,
        source: Callsign,
        digipeaters: Vec<Callsign>,
    ) -> Result<Self, FrameError> {
        if digipeaters.len() > MAX_DIGIPEATERS {
            return Err(FrameError::MalformedPath(format!(
                "{} digipeaters (max {})",
                digipeaters.len(),
                MAX_DIGIPEATERS
            )));
        }
        Ok(Self {
            destination,
            source,
            digipeaters,
        })
    }

    /// Serialize the path; only the final address carries the low bit.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let last_is_source = self.digipeaters.is_empty();
        out.extend_from_slice(&self.destination.encode(false));
        out.extend_from_slice(&self.source.encode(last_is_source));
        for (i, digi) in self.digipeaters.iter().enumerate() {
            let last = i + 1 == self.digipeaters.len();
            out.extend_from_slice(&digi.encode(last));
        }
    }

    /// Decode a path from the head of `data`; returns the path and the
    /// number of bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), FrameError> {
        let mut addresses = Vec::new();
        let mut offset = 0;

        loop {
            let (addr, last) = Callsign::decode(&data[offset..])?;
            addresses.push(addr);
            offset += ADDRESS_LEN;
            if last {
                break;
            }
            if addresses.len() >= 2 + MAX_DIGIPEATERS {
                return Err(FrameError::MalformedPath(
                    "no end-of-path marker within 10 addresses".into(),
                ));
            }
        }

        if addresses.len() < 2 {
            return Err(FrameError::MalformedPath("fewer than two addresses".into()));
        }

        let mut iter = addresses.into_iter();
        let destination = iter.next().unwrap();
        let source = iter.next().unwrap();
        Ok((
            Self {
                destination,
                source,
                digipeaters: iter.collect(),
            },
            offset,
        ))
    }
}

impl fmt::Display for Path {
    /// TNC2-style rendering: `SRC>DEST,DIGI1,DIGI2*`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}>{}", self.source, self.destination)?;
        for digi in &self.digipeaters {
            write!(f, ",{}", digi)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain() {
        let call: Callsign = "VK4MSL".parse().unwrap();
        assert_eq!(call.base(), "VK4MSL");
        assert_eq!(call.ssid(), 0);
        assert!(!call.ch());
    }

    #[test]
    fn test_parse_with_ssid_and_flag() {
        let call: Callsign = "vk4msl-9*".parse().unwrap();
        assert_eq!(call.base(), "VK4MSL");
        assert_eq!(call.ssid(), 9);
        assert!(call.ch());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<Callsign>().is_err());
        assert!("TOOLONGCALL".parse::<Callsign>().is_err());
        assert!("VK4MSL-16".parse::<Callsign>().is_err());
        assert!("VK4 SL".parse::<Callsign>().is_err());
        assert!("VK4MSL-x".parse::<Callsign>().is_err());
    }

    #[test]
    fn test_encode_vk4msl_9() {
        // Shifted ASCII plus SSID octet with reserved bits set
        let call: Callsign = "VK4MSL-9".parse().unwrap();
        assert_eq!(
            call.encode(false),
            [0xAC, 0x96, 0x68, 0x9A, 0xA6, 0x98, 0x72]
        );
        assert_eq!(
            call.encode(true),
            [0xAC, 0x96, 0x68, 0x9A, 0xA6, 0x98, 0x73]
        );
    }

    #[test]
    fn test_decode_round_trip() {
        let call: Callsign = "VK4MSL-9".parse().unwrap();
        let (decoded, last) = Callsign::decode(&call.encode(true)).unwrap();
        assert_eq!(decoded, call);
        assert!(last);
        assert_eq!(decoded.base(), "VK4MSL");
        assert_eq!(decoded.ssid(), 9);
    }

    #[test]
    fn test_equality_ignores_flags() {
        let a: Callsign = "VK4MSL-9".parse().unwrap();
        let b: Callsign = "VK4MSL-9*".parse().unwrap();
        assert_eq!(a, b);
        assert_ne!(a, "VK4MSL-8".parse::<Callsign>().unwrap());
    }

    #[test]
    fn test_display() {
        assert_eq!("VK4MSL".parse::<Callsign>().unwrap().to_string(), "VK4MSL");
        assert_eq!(
            "VK4MSL-9*".parse::<Callsign>().unwrap().to_string(),
            "VK4MSL-9*"
        );
    }

    #[test]
    fn test_path_last_bit_placement() {
        let path = Path::new(
            "APZAIO".parse().unwrap(),
            "VK4MSL-9".parse().unwrap(),
            vec!["WIDE1-1".parse().unwrap(), "WIDE2-1".parse().unwrap()],
        )
        .unwrap();

        let mut encoded = Vec::new();
        path.encode(&mut encoded);
        assert_eq!(encoded.len(), 4 * ADDRESS_LEN);

        // Only the final SSID octet has the extension bit
        for idx in 0..4 {
            let ssid_byte = encoded[idx * ADDRESS_LEN + 6];
            assert_eq!(ssid_byte & 0x01 != 0, idx == 3);
        }

        let (decoded, consumed) = Path::decode(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded, path);
    }

    #[test]
    fn test_path_rejects_too_many_digipeaters() {
        let digi: Callsign = "WIDE1-1".parse().unwrap();
        let result = Path::new(
            "APZAIO".parse().unwrap(),
            "VK4MSL".parse().unwrap(),
            vec![digi; 9],
        );
        assert!(matches!(result, Err(FrameError::MalformedPath(_))));
    }

    #[test]
    fn test_path_decode_requires_terminator() {
        let call: Callsign = "VK4MSL".parse().unwrap();
        let mut data = Vec::new();
        for _ in 0..10 {
            data.extend_from_slice(&call.encode(false));
        }
        assert!(matches!(
            Path::decode(&data),
            Err(FrameError::MalformedPath(_))
        ));
    }

    #[test]
    fn test_path_display() {
        let path = Path::new(
            "APZAIO".parse().unwrap(),
            "VK4MSL-9".parse().unwrap(),
            vec!["VK4RZB*".parse().unwrap()],
        )
        .unwrap();
        assert_eq!(path.to_string(), "VK4MSL-9>APZAIO,VK4RZB*");
    }
}
