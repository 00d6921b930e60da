//! # NMEA Sentence Assembler
//!
//! Reassembles NMEA-0183 sentences one byte at a time and extracts the fields
//! the tracker consumes from GGA, RMC and GSV sentences.
//!
//! Sentences must carry a valid `*hh` checksum. Anything malformed (bad
//! checksum, overlong line, unparsable field) is dropped and the assembler
//! starts over at the next `$`.

use crate::error::{Result, TrackerError};
use tracing::debug;

/// Maximum NMEA sentence length including `$` and checksum, excluding CR/LF
pub const MAX_SENTENCE_LEN: usize = 82;

/// Latitude or longitude magnitude plus its hemisphere letter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    /// Decimal degrees, always non-negative
    pub degrees: f64,
    /// Hemisphere letter as sent (`N`, `S`, `E`, `W`)
    pub hemisphere: char,
}

impl Coordinate {
    /// Signed decimal degrees: south and west are negative
    pub fn signed(&self) -> f64 {
        match self.hemisphere {
            'S' | 'W' => -self.degrees,
            _ => self.degrees,
        }
    }
}

/// UTC time of day as reported by the receiver
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UtcTime {
    pub hour: u8,
    pub minute: u8,
    pub seconds: f64,
}

/// UTC date with a two-digit year
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtcDate {
    pub day: u8,
    pub month: u8,
    pub year: u8,
}

/// GGA: fix data
#[derive(Debug, Clone, PartialEq)]
pub struct Gga {
    pub time: Option<UtcTime>,
    pub latitude: Option<Coordinate>,
    pub longitude: Option<Coordinate>,
    pub fix_quality: u8,
    pub satellites_in_use: u8,
}

/// RMC: recommended minimum data
#[derive(Debug, Clone, PartialEq)]
pub struct Rmc {
    pub time: Option<UtcTime>,
    pub active: bool,
    pub latitude: Option<Coordinate>,
    pub longitude: Option<Coordinate>,
    pub date: Option<UtcDate>,
}

/// GSV: satellites in view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gsv {
    pub satellites_in_view: u8,
}

/// A decoded sentence
#[derive(Debug, Clone, PartialEq)]
pub enum Sentence {
    Gga(Gga),
    Rmc(Rmc),
    Gsv(Gsv),
    /// Valid checksum but a sentence type we do not consume
    Other(String),
}

/// Byte-at-a-time sentence reassembler
///
/// Partial sentences persist across calls, so input may be split anywhere.
#[derive(Debug, Default)]
pub struct SentenceAssembler {
    buffer: String,
    in_sentence: bool,
    parsed: u64,
    rejected: u64,
}

impl SentenceAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte; returns a sentence when this byte completed a valid one
    pub fn feed(&mut self, byte: u8) -> Option<Sentence> {
        match byte {
            b'$' => {
                if self.in_sentence && !self.buffer.is_empty() {
                    self.reject("sentence restarted before terminator");
                }
                self.buffer.clear();
                self.buffer.push('$');
                self.in_sentence = true;
                None
            }
            b'\r' => None,
            b'\n' => {
                if !self.in_sentence {
                    return None;
                }
                self.in_sentence = false;
                let line = std::mem::take(&mut self.buffer);
                match parse_sentence(&line) {
                    Ok(sentence) => {
                        self.parsed += 1;
                        Some(sentence)
                    }
                    Err(e) => {
                        self.reject(&e.to_string());
                        None
                    }
                }
            }
            _ if self.in_sentence => {
                if self.buffer.len() >= MAX_SENTENCE_LEN {
                    self.reject("sentence too long");
                    return None;
                }
                self.buffer.push(byte as char);
                None
            }
            _ => None,
        }
    }

    /// Number of sentences decoded successfully
    pub fn parsed(&self) -> u64 {
        self.parsed
    }

    /// Number of sentences dropped as malformed
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    fn reject(&mut self, reason: &str) {
        debug!("Dropping NMEA sentence: {}", reason);
        self.rejected += 1;
        self.buffer.clear();
        self.in_sentence = false;
    }
}

/// Verify the `*hh` checksum of a complete sentence (XOR of bytes between `$` and `*`)
pub fn validate_checksum(line: &str) -> bool {
    let Some(body) = line.strip_prefix('$') else {
        return false;
    };
    let Some((payload, checksum_hex)) = body.rsplit_once('*') else {
        return false;
    };
    if checksum_hex.len() != 2 {
        return false;
    }
    let Ok(expected) = u8::from_str_radix(checksum_hex, 16) else {
        return false;
    };

    let calc = payload.bytes().fold(0u8, |acc, b| acc ^ b);
    calc == expected
}

/// Parse a complete sentence (without CR/LF)
pub fn parse_sentence(line: &str) -> Result<Sentence> {
    if !validate_checksum(line) {
        return Err(TrackerError::Nmea(format!("checksum mismatch in '{}'", line)));
    }

    // validate_checksum guarantees the leading '$' and a '*'
    let payload = match line[1..].rsplit_once('*') {
        Some((payload, _)) => payload,
        None => return Err(TrackerError::Nmea("missing checksum".to_string())),
    };
    let fields: Vec<&str> = payload.split(',').collect();

    let address = fields[0];
    if address.len() < 5 {
        return Err(TrackerError::Nmea(format!("bad address field '{}'", address)));
    }
    // Talker ID (GP, GN, GL, ...) is ignored
    let kind = &address[address.len() - 3..];

    match kind {
        "GGA" => parse_gga(&fields).map(Sentence::Gga),
        "RMC" => parse_rmc(&fields).map(Sentence::Rmc),
        "GSV" => parse_gsv(&fields).map(Sentence::Gsv),
        _ => Ok(Sentence::Other(kind.to_string())),
    }
}

fn field<'a>(fields: &[&'a str], index: usize) -> &'a str {
    fields.get(index).copied().unwrap_or("")
}

fn parse_gga(fields: &[&str]) -> Result<Gga> {
    if fields.len() < 10 {
        return Err(TrackerError::Nmea(format!("GGA has {} fields", fields.len())));
    }

    let fix_quality = parse_u8_or_zero(field(fields, 6), "fix quality")?;
    let (latitude, longitude) = if fix_quality > 0 {
        parse_position(fields, 2)?
    } else {
        (None, None)
    };

    Ok(Gga {
        time: parse_time(field(fields, 1))?,
        latitude,
        longitude,
        fix_quality,
        satellites_in_use: parse_u8_or_zero(field(fields, 7), "satellites in use")?,
    })
}

fn parse_rmc(fields: &[&str]) -> Result<Rmc> {
    if fields.len() < 10 {
        return Err(TrackerError::Nmea(format!("RMC has {} fields", fields.len())));
    }

    let active = field(fields, 2) == "A";
    let (latitude, longitude) = if active {
        parse_position(fields, 3)?
    } else {
        (None, None)
    };

    Ok(Rmc {
        time: parse_time(field(fields, 1))?,
        active,
        latitude,
        longitude,
        date: parse_date(field(fields, 9))?,
    })
}

fn parse_gsv(fields: &[&str]) -> Result<Gsv> {
    if fields.len() < 4 {
        return Err(TrackerError::Nmea(format!("GSV has {} fields", fields.len())));
    }
    Ok(Gsv {
        satellites_in_view: parse_u8_or_zero(field(fields, 3), "satellites in view")?,
    })
}

/// Parse a latitude/longitude pair starting at `start` (lat, N/S, lon, E/W).
///
/// Both halves parse or neither is returned, so a fix never mixes a fresh
/// latitude with a stale longitude.
fn parse_position(fields: &[&str], start: usize) -> Result<(Option<Coordinate>, Option<Coordinate>)> {
    let lat = parse_coordinate(field(fields, start), field(fields, start + 1), 2)?;
    let lon = parse_coordinate(field(fields, start + 2), field(fields, start + 3), 3)?;
    match (lat, lon) {
        (Some(lat), Some(lon)) => Ok((Some(lat), Some(lon))),
        _ => Ok((None, None)),
    }
}

/// Parse `ddmm.mmmm` / `dddmm.mmmm` into decimal degrees
fn parse_coordinate(raw: &str, hemisphere: &str, degree_digits: usize) -> Result<Option<Coordinate>> {
    if raw.is_empty() || hemisphere.is_empty() {
        return Ok(None);
    }
    if raw.len() < degree_digits + 2 || !raw.is_char_boundary(degree_digits) {
        return Err(TrackerError::Nmea(format!("coordinate '{}' too short", raw)));
    }

    let degrees: f64 = raw[..degree_digits]
        .parse()
        .map_err(|_| TrackerError::Nmea(format!("bad coordinate degrees '{}'", raw)))?;
    let minutes: f64 = raw[degree_digits..]
        .parse()
        .map_err(|_| TrackerError::Nmea(format!("bad coordinate minutes '{}'", raw)))?;
    if !(0.0..60.0).contains(&minutes) {
        return Err(TrackerError::Nmea(format!("coordinate minutes out of range '{}'", raw)));
    }

    let hemisphere = hemisphere.chars().next().unwrap_or('N');
    Ok(Some(Coordinate {
        degrees: degrees + minutes / 60.0,
        hemisphere,
    }))
}

/// Parse `hhmmss[.sss]`
fn parse_time(raw: &str) -> Result<Option<UtcTime>> {
    if raw.is_empty() {
        return Ok(None);
    }
    if raw.len() < 6 || !raw.is_char_boundary(6) {
        return Err(TrackerError::Nmea(format!("bad time '{}'", raw)));
    }
    let bad = || TrackerError::Nmea(format!("bad time '{}'", raw));

    let hour: u8 = raw[0..2].parse().map_err(|_| bad())?;
    let minute: u8 = raw[2..4].parse().map_err(|_| bad())?;
    let seconds: f64 = raw[4..].parse().map_err(|_| bad())?;
    if hour > 23 || minute > 59 || !(0.0..61.0).contains(&seconds) {
        return Err(bad());
    }

    Ok(Some(UtcTime { hour, minute, seconds }))
}

/// Parse `ddmmyy`
fn parse_date(raw: &str) -> Result<Option<UtcDate>> {
    if raw.is_empty() {
        return Ok(None);
    }
    let bad = || TrackerError::Nmea(format!("bad date '{}'", raw));
    if raw.len() != 6 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }

    let day: u8 = raw[0..2].parse().map_err(|_| bad())?;
    let month: u8 = raw[2..4].parse().map_err(|_| bad())?;
    let year: u8 = raw[4..6].parse().map_err(|_| bad())?;
    if day == 0 || day > 31 || month == 0 || month > 12 {
        return Err(bad());
    }

    Ok(Some(UtcDate { day, month, year }))
}

fn parse_u8_or_zero(raw: &str, what: &str) -> Result<u8> {
    if raw.is_empty() {
        return Ok(0);
    }
    raw.parse()
        .map_err(|_| TrackerError::Nmea(format!("bad {} '{}'", what, raw)))
}

/// Wrap a payload (without `$` and `*hh`) into a checksummed sentence with CRLF
#[cfg(test)]
pub fn with_checksum(payload: &str) -> String {
    let checksum = payload.bytes().fold(0u8, |acc, b| acc ^ b);
    format!("${}*{:02X}\r\n", payload, checksum)
}
