//! # Fix Stream Decoder
//!
//! Converts the raw GNSS byte stream into [`FixState`].
//!
//! The decoder never blocks and never assumes sentence boundaries line up with
//! call boundaries. Bytes outside the printable range `10..=126` are discarded
//! before they reach the sentence assembler.

use super::sentence::{Coordinate, Sentence, SentenceAssembler, UtcDate, UtcTime};
use super::timestamp;

/// Lowest byte value passed to the assembler (line feed)
const MIN_ACCEPTED_BYTE: u8 = 10;

/// Highest byte value passed to the assembler (`~`)
const MAX_ACCEPTED_BYTE: u8 = 126;

/// Latest fix as seen by the scheduler
///
/// Overwritten wholesale whenever a new fix is published; losing the fix only
/// clears `has_fix` and keeps the last coordinates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FixState {
    pub has_fix: bool,
    pub latitude: f64,
    pub longitude: f64,
    /// ISO-8601 UTC, empty until the first fix
    pub timestamp: String,
    pub satellites_in_use: u8,
    pub satellites_in_view: u8,
}

/// Result of one decode cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixUpdate {
    /// A fix with a new (latitude, longitude, timestamp) was published
    Published,
    /// Fix held, identical to the last published one
    Unchanged,
    /// Receiver reports no fix
    NoFix,
}

impl FixUpdate {
    pub fn has_fix(self) -> bool {
        !matches!(self, FixUpdate::NoFix)
    }
}

/// Subfields accumulated from sentences, kept across decode calls
#[derive(Debug, Default)]
struct RawFields {
    date: Option<UtcDate>,
    time: Option<UtcTime>,
    fix_quality: u8,
    latitude: Option<Coordinate>,
    longitude: Option<Coordinate>,
    satellites_in_use: u8,
    satellites_in_view: u8,
}

impl RawFields {
    fn apply(&mut self, sentence: Sentence) {
        match sentence {
            Sentence::Gga(gga) => {
                self.fix_quality = gga.fix_quality;
                self.satellites_in_use = gga.satellites_in_use;
                if gga.time.is_some() {
                    self.time = gga.time;
                }
                self.set_position(gga.latitude, gga.longitude);
            }
            Sentence::Rmc(rmc) => {
                if rmc.time.is_some() {
                    self.time = rmc.time;
                }
                if rmc.date.is_some() {
                    self.date = rmc.date;
                }
                if !rmc.active {
                    self.fix_quality = 0;
                }
                self.set_position(rmc.latitude, rmc.longitude);
            }
            Sentence::Gsv(gsv) => {
                self.satellites_in_view = gsv.satellites_in_view;
            }
            Sentence::Other(_) => {}
        }
    }

    /// A fix sentence without a full position invalidates the stored one,
    /// so coordinates never outlive the cycle that reported them
    fn set_position(&mut self, latitude: Option<Coordinate>, longitude: Option<Coordinate>) {
        match (latitude, longitude) {
            (Some(lat), Some(lon)) => {
                self.latitude = Some(lat);
                self.longitude = Some(lon);
            }
            _ => {
                self.latitude = None;
                self.longitude = None;
            }
        }
    }
}

/// Incremental decoder from receiver bytes to [`FixState`]
#[derive(Debug, Default)]
pub struct FixDecoder {
    assembler: SentenceAssembler,
    raw: RawFields,
    fix: FixState,
    last_published: Option<(f64, f64, String)>,
}

impl FixDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the bytes read since the last call (possibly none) and re-evaluate the fix
    ///
    /// # Examples
    ///
    /// ```
    /// use gnss_tracker::gnss::decoder::{FixDecoder, FixUpdate};
    ///
    /// let mut decoder = FixDecoder::new();
    /// assert_eq!(decoder.feed(b"$GPGGA,0102"), FixUpdate::NoFix);
    /// assert!(!decoder.fix().has_fix);
    /// ```
    pub fn feed(&mut self, bytes: &[u8]) -> FixUpdate {
        for &byte in bytes {
            if !(MIN_ACCEPTED_BYTE..=MAX_ACCEPTED_BYTE).contains(&byte) {
                continue;
            }
            if let Some(sentence) = self.assembler.feed(byte) {
                self.raw.apply(sentence);
            }
        }

        self.evaluate()
    }

    /// Current fix state
    pub fn fix(&self) -> &FixState {
        &self.fix
    }

    /// Sentences decoded and dropped so far
    pub fn sentence_counts(&self) -> (u64, u64) {
        (self.assembler.parsed(), self.assembler.rejected())
    }

    fn evaluate(&mut self) -> FixUpdate {
        let candidate = match (&self.raw, self.raw.fix_quality > 0) {
            (
                RawFields {
                    date: Some(date),
                    time: Some(time),
                    latitude: Some(lat),
                    longitude: Some(lon),
                    ..
                },
                true,
            ) => Some((lat.signed(), lon.signed(), timestamp::normalize(*date, *time))),
            _ => None,
        };

        let Some(current) = candidate else {
            self.fix.has_fix = false;
            return FixUpdate::NoFix;
        };

        if self.last_published.as_ref() == Some(&current) {
            self.fix.has_fix = true;
            self.fix.satellites_in_use = self.raw.satellites_in_use;
            self.fix.satellites_in_view = self.raw.satellites_in_view;
            return FixUpdate::Unchanged;
        }

        let (latitude, longitude, timestamp) = current.clone();
        self.fix = FixState {
            has_fix: true,
            latitude,
            longitude,
            timestamp,
            satellites_in_use: self.raw.satellites_in_use,
            satellites_in_view: self.raw.satellites_in_view,
        };
        self.last_published = Some(current);
        FixUpdate::Published
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gnss::sentence::with_checksum;

    fn fix_burst(lat: &str, ns: &str, lon: &str, ew: &str, time: &str, date: &str) -> String {
        format!(
            "{}{}{}",
            with_checksum(&format!("GPRMC,{time},A,{lat},{ns},{lon},{ew},0.02,,{date},,,A")),
            with_checksum(&format!("GPGGA,{time},{lat},{ns},{lon},{ew},1,07,1.2,35.0,M,-20.1,M,,")),
            with_checksum("GPGSV,3,1,12,10,63,137,17,07,61,098,15,05,59,290,20,08,54,157,30"),
        )
    }

    fn no_fix_burst() -> String {
        format!(
            "{}{}",
            with_checksum("GPRMC,010210.00,V,,,,,,,040506,,,N"),
            with_checksum("GPGGA,010210.00,,,,,0,00,99.99,,,,,,"),
        )
    }

    #[test]
    fn test_southern_western_fix() {
        let mut decoder = FixDecoder::new();
        let data = fix_burst("3345.0000", "S", "15112.0000", "W", "010203.00", "040506");

        assert_eq!(decoder.feed(data.as_bytes()), FixUpdate::Published);

        let fix = decoder.fix();
        assert!(fix.has_fix);
        assert!((fix.latitude + 33.75).abs() < 1e-9);
        assert!((fix.longitude + 151.2).abs() < 1e-9);
        assert_eq!(fix.timestamp, "2006-05-04T01:02:03Z");
        assert_eq!(fix.satellites_in_use, 7);
        assert_eq!(fix.satellites_in_view, 12);
    }

    #[test]
    fn test_northern_eastern_fix_positive() {
        let mut decoder = FixDecoder::new();
        let data = fix_burst("3345.0000", "N", "15112.0000", "E", "010203.00", "040506");
        decoder.feed(data.as_bytes());

        assert!(decoder.fix().latitude > 0.0);
        assert!(decoder.fix().longitude > 0.0);
    }

    #[test]
    fn test_no_fix_keeps_previous_coordinates() {
        let mut decoder = FixDecoder::new();
        let data = fix_burst("3345.0000", "S", "15112.0000", "W", "010203.00", "040506");
        decoder.feed(data.as_bytes());
        let before = decoder.fix().clone();

        assert_eq!(decoder.feed(no_fix_burst().as_bytes()), FixUpdate::NoFix);

        let after = decoder.fix();
        assert!(!after.has_fix);
        assert_eq!(after.latitude, before.latitude);
        assert_eq!(after.longitude, before.longitude);
        assert_eq!(after.timestamp, before.timestamp);
    }

    #[test]
    fn test_no_fix_from_cold_start() {
        let mut decoder = FixDecoder::new();
        assert_eq!(decoder.feed(no_fix_burst().as_bytes()), FixUpdate::NoFix);
        assert_eq!(decoder.fix(), &FixState::default());
    }

    #[test]
    fn test_identical_fix_is_not_republished() {
        let mut decoder = FixDecoder::new();
        let data = fix_burst("3345.0000", "S", "15112.0000", "W", "010203.00", "040506");

        assert_eq!(decoder.feed(data.as_bytes()), FixUpdate::Published);
        assert_eq!(decoder.feed(data.as_bytes()), FixUpdate::Unchanged);
        assert_eq!(decoder.feed(&[]), FixUpdate::Unchanged);
        assert!(decoder.fix().has_fix);
    }

    #[test]
    fn test_new_timestamp_is_republished() {
        let mut decoder = FixDecoder::new();
        let first = fix_burst("3345.0000", "S", "15112.0000", "W", "010203.00", "040506");
        let second = fix_burst("3345.0000", "S", "15112.0000", "W", "010204.00", "040506");

        assert_eq!(decoder.feed(first.as_bytes()), FixUpdate::Published);
        assert_eq!(decoder.feed(second.as_bytes()), FixUpdate::Published);
        assert_eq!(decoder.fix().timestamp, "2006-05-04T01:02:04Z");
    }

    #[test]
    fn test_fix_without_position_is_not_published() {
        let mut decoder = FixDecoder::new();
        let data = fix_burst("3345.0000", "S", "15112.0000", "W", "010203.00", "040506");
        assert_eq!(decoder.feed(data.as_bytes()), FixUpdate::Published);

        let gga = with_checksum("GPGGA,010204.00,,,,,1,07,1.2,35.0,M,,M,,");
        assert_ne!(decoder.feed(gga.as_bytes()), FixUpdate::Published);
        assert_eq!(decoder.fix().timestamp, "2006-05-04T01:02:03Z");

        let rmc = with_checksum("GPRMC,010205.00,A,,,,,0.02,,040506,,,A");
        assert_ne!(decoder.feed(rmc.as_bytes()), FixUpdate::Published);
        assert_eq!(decoder.fix().timestamp, "2006-05-04T01:02:03Z");
    }

    #[test]
    fn test_fix_regained_with_same_data_is_held() {
        let mut decoder = FixDecoder::new();
        let data = fix_burst("3345.0000", "S", "15112.0000", "W", "010203.00", "040506");
        decoder.feed(data.as_bytes());
        decoder.feed(no_fix_burst().as_bytes());

        assert_eq!(decoder.feed(data.as_bytes()), FixUpdate::Unchanged);
        assert!(decoder.fix().has_fix);
    }

    #[test]
    fn test_partial_sentence_across_calls() {
        let mut decoder = FixDecoder::new();
        let data = fix_burst("3345.0000", "S", "15112.0000", "W", "010203.00", "040506");
        let bytes = data.as_bytes();

        let mut published = 0;
        for chunk in bytes.chunks(7) {
            if decoder.feed(chunk) == FixUpdate::Published {
                published += 1;
            }
        }
        assert_eq!(published, 1);
        assert!(decoder.fix().has_fix);
    }

    #[test]
    fn test_non_printable_bytes_discarded() {
        let mut decoder = FixDecoder::new();
        let data = fix_burst("3345.0000", "S", "15112.0000", "W", "010203.00", "040506");

        let mut noisy = Vec::new();
        for (i, b) in data.bytes().enumerate() {
            noisy.push(b);
            if i % 5 == 0 {
                noisy.extend_from_slice(&[0x00, 0xFF, 0x07, 0x80]);
            }
        }

        assert_eq!(decoder.feed(&noisy), FixUpdate::Published);
        assert_eq!(decoder.fix().timestamp, "2006-05-04T01:02:03Z");
        assert_eq!(decoder.sentence_counts().1, 0);
    }

    #[test]
    fn test_fix_requires_date() {
        let mut decoder = FixDecoder::new();
        let gga = with_checksum("GPGGA,010203.00,3345.0000,S,15112.0000,W,1,07,1.2,35.0,M,,M,,");
        assert_eq!(decoder.feed(gga.as_bytes()), FixUpdate::NoFix);

        let rmc = with_checksum("GPRMC,010203.00,A,3345.0000,S,15112.0000,W,0.02,,040506,,,A");
        assert_eq!(decoder.feed(rmc.as_bytes()), FixUpdate::Published);
    }

    #[test]
    fn test_rmc_void_clears_fix() {
        let mut decoder = FixDecoder::new();
        let data = fix_burst("3345.0000", "S", "15112.0000", "W", "010203.00", "040506");
        decoder.feed(data.as_bytes());

        let void = with_checksum("GPRMC,010205.00,V,,,,,,,040506,,,N");
        assert_eq!(decoder.feed(void.as_bytes()), FixUpdate::NoFix);
    }

    #[test]
    fn test_update_has_fix() {
        assert!(FixUpdate::Published.has_fix());
        assert!(FixUpdate::Unchanged.has_fix());
        assert!(!FixUpdate::NoFix.has_fix());
    }
}
