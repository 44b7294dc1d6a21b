//! Device timestamps.
//!
//! The device counts time as a 64 bit number of microseconds since
//! 0000-01-01 (proleptic Gregorian), carried on the wire as two
//! little-endian dwords. Conversions to host time go through chrono.

use chrono::NaiveDateTime;

/// A timestamp in the device's native representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PsiTime {
    hi: u32,
    lo: u32,
}

impl PsiTime {
    pub fn new(hi: u32, lo: u32) -> PsiTime {
        PsiTime { hi, lo }
    }

    pub fn hi(&self) -> u32 {
        self.hi
    }

    pub fn lo(&self) -> u32 {
        self.lo
    }

    /// Microseconds since the device epoch.
    pub fn micros(&self) -> u64 {
        ((self.hi as u64) << 32) | self.lo as u64
    }

    pub fn from_micros(micros: u64) -> PsiTime {
        PsiTime {
            hi: (micros >> 32) as u32,
            lo: micros as u32,
        }
    }

    pub fn to_unix_secs(&self) -> i64 {
        (self.micros() / 1_000_000) as i64 - epoch_offset_secs()
    }

    pub fn from_unix_secs(secs: i64) -> PsiTime {
        let device_secs = secs + epoch_offset_secs();
        if device_secs < 0 {
            return PsiTime::new(0, 0);
        }
        PsiTime::from_micros(device_secs as u64 * 1_000_000)
    }

    /// Host-side view of the timestamp, None for values chrono cannot
    /// represent.
    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        let secs = self.to_unix_secs();
        let micros = (self.micros() % 1_000_000) as u32;
        NaiveDateTime::from_timestamp_opt(secs, micros * 1000)
    }
}

/// Seconds between the device epoch (0000-01-01) and the Unix epoch.
fn epoch_offset_secs() -> i64 {
    use chrono::NaiveDate;
    let device_epoch = NaiveDate::from_ymd_opt(0, 1, 1)
        .expect("valid date")
        .and_hms_opt(0, 0, 0)
        .expect("valid time");
    let unix_epoch = NaiveDate::from_ymd_opt(1970, 1, 1)
        .expect("valid date")
        .and_hms_opt(0, 0, 0)
        .expect("valid time");
    unix_epoch.signed_duration_since(device_epoch).num_seconds()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_offset() {
        // 719528 days between 0000-01-01 and 1970-01-01.
        assert_eq!(62_167_219_200, epoch_offset_secs());
    }

    #[test]
    fn test_unix_roundtrip() {
        let t = PsiTime::from_unix_secs(951_782_400); // 2000-02-29
        assert_eq!(951_782_400, t.to_unix_secs());
    }

    #[test]
    fn test_wire_split() {
        let t = PsiTime::from_micros(0x0123_4567_89ab_cdef);
        assert_eq!(0x0123_4567, t.hi());
        assert_eq!(0x89ab_cdef, t.lo());
        assert_eq!(t, PsiTime::new(t.hi(), t.lo()));
    }

    #[test]
    fn test_to_datetime() {
        let t = PsiTime::from_unix_secs(0);
        let dt = t.to_datetime().unwrap();
        assert_eq!("1970-01-01 00:00:00", dt.format("%Y-%m-%d %H:%M:%S").to_string());
    }
}
