use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MirrorError;

/// Processing level of a dataset identifier.
///
/// `HK` parses so that housekeeping files can be recognized on disk; the
/// placement rule rejects it explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Ll02,
    Ll03,
    L1,
    L1R,
    L2,
    L3,
    Hk,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Ll02 => "LL02",
            Level::Ll03 => "LL03",
            Level::L1 => "L1",
            Level::L1R => "L1R",
            Level::L2 => "L2",
            Level::L3 => "L3",
            Level::Hk => "HK",
        }
    }

    /// Levels filed under the day-resolved directory layout.
    pub fn uses_daily_layout(&self) -> bool {
        matches!(self, Level::Ll02 | Level::Ll03 | Level::L1 | Level::L1R)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Level {
    type Err = MirrorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "LL02" => Ok(Level::Ll02),
            "LL03" => Ok(Level::Ll03),
            "L1" => Ok(Level::L1),
            "L1R" => Ok(Level::L1R),
            "L2" => Ok(Level::L2),
            "L3" => Ok(Level::L3),
            "HK" => Ok(Level::Hk),
            _ => Err(MirrorError::InvalidDsid(value.to_string())),
        }
    }
}

/// Parsed dataset identifier, e.g. `SOLO_L2_RPW-LFR-SBM2-CWF-E`.
///
/// The descriptor keeps the instrument token as its first segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dsid {
    pub source: String,
    pub level: Level,
    pub instrument: String,
    pub descriptor: String,
}

impl fmt::Display for Dsid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.source, self.level, self.descriptor)
    }
}

impl FromStr for Dsid {
    type Err = MirrorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.to_uppercase().contains("-CDAG") {
            return Err(MirrorError::CdagInDsid(value.to_string()));
        }
        if value != value.to_uppercase() {
            return Err(MirrorError::InvalidDsid(value.to_string()));
        }
        let mut parts = value.splitn(3, '_');
        let source = parts
            .next()
            .filter(|part| !part.is_empty())
            .ok_or_else(|| MirrorError::InvalidDsid(value.to_string()))?;
        let level = parts
            .next()
            .ok_or_else(|| MirrorError::InvalidDsid(value.to_string()))?
            .parse::<Level>()
            .map_err(|_| MirrorError::InvalidDsid(value.to_string()))?;
        let descriptor = parts
            .next()
            .filter(|part| !part.is_empty())
            .ok_or_else(|| MirrorError::InvalidDsid(value.to_string()))?;
        let instrument = descriptor.split('-').next().unwrap_or(descriptor);
        Ok(Self {
            source: source.to_string(),
            level,
            instrument: instrument.to_string(),
            descriptor: descriptor.to_string(),
        })
    }
}

/// Begin time extracted from a time interval string.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeVector {
    Calendar {
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
        second: f64,
    },
    /// Onboard-time ticks; carries no calendar information.
    Onboard(u64),
}

impl TimeVector {
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match *self {
            TimeVector::Calendar {
                year,
                month,
                day,
                hour,
                minute,
                second,
            } => {
                let millis = (second.fract() * 1000.0).round() as u32;
                NaiveDate::from_ymd_opt(year, month, day)
                    .and_then(|date| date.and_hms_milli_opt(hour, minute, second as u32, millis))
                    .map(|naive| Utc.from_utc_datetime(&naive))
            }
            TimeVector::Onboard(_) => None,
        }
    }
}

fn all_digits(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|byte| byte.is_ascii_digit())
}

fn parse_date8(value: &str) -> Option<(i32, u32, u32)> {
    if value.len() != 8 || !all_digits(value) {
        return None;
    }
    let year = value[0..4].parse().ok()?;
    let month = value[4..6].parse().ok()?;
    let day = value[6..8].parse().ok()?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    Some((year, month, day))
}

/// Parses `YYYYMMDDThhmmss` with 0-3 sub-second digits.
fn parse_datetime(value: &str) -> Option<(i32, u32, u32, u32, u32, f64)> {
    let (date, time) = value.split_once('T')?;
    let (year, month, day) = parse_date8(date)?;
    if time.len() < 6 || time.len() > 9 || !all_digits(time) {
        return None;
    }
    let hour: u32 = time[0..2].parse().ok()?;
    let minute: u32 = time[2..4].parse().ok()?;
    let whole: u32 = time[4..6].parse().ok()?;
    if hour > 23 || minute > 59 || whole > 60 {
        return None;
    }
    let frac = &time[6..];
    let mut second = whole as f64;
    if !frac.is_empty() {
        second += frac.parse::<f64>().ok()? / 10f64.powi(frac.len() as i32);
    }
    Some((year, month, day, hour, minute, second))
}

/// Parses one of the five time interval shapes into its begin time.
pub fn parse_time_interval(value: &str) -> Result<TimeVector, MirrorError> {
    let invalid = || MirrorError::InvalidTimeInterval(value.to_string());

    if let Some((first, rest)) = value.split_once('-') {
        // Onboard ticks are ten digits on each side; calendar dates are eight.
        if first.len() == 10 && rest.len() == 10 && all_digits(first) && all_digits(rest) {
            let ticks = first.parse::<u64>().map_err(|_| invalid())?;
            return Ok(TimeVector::Onboard(ticks));
        }
        if first.contains('T') {
            let (year, month, day, hour, minute, second) =
                parse_datetime(first).ok_or_else(invalid)?;
            parse_datetime(rest).ok_or_else(invalid)?;
            return Ok(TimeVector::Calendar {
                year,
                month,
                day,
                hour,
                minute,
                second,
            });
        }
        let (year, month, day) = parse_date8(first).ok_or_else(invalid)?;
        parse_date8(rest).ok_or_else(invalid)?;
        return Ok(TimeVector::Calendar {
            year,
            month,
            day,
            hour: 0,
            minute: 0,
            second: 0.0,
        });
    }

    if value.contains('T') {
        let (year, month, day, hour, minute, second) = parse_datetime(value).ok_or_else(invalid)?;
        return Ok(TimeVector::Calendar {
            year,
            month,
            day,
            hour,
            minute,
            second,
        });
    }

    let (year, month, day) = parse_date8(value).ok_or_else(invalid)?;
    Ok(TimeVector::Calendar {
        year,
        month,
        day,
        hour: 0,
        minute: 0,
        second: 0.0,
    })
}

/// Recognized dataset filename,
/// e.g. `solo_L2_rpw-lfr-surv-cwf-e-cdag_20200213_V05.cdf`.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetFilename {
    /// Uppercase DSID with the CDAG marker stripped.
    pub dsid: String,
    pub time_interval: String,
    pub version: u32,
    pub time_vector: TimeVector,
    /// Canonical item identifier; uniquely names the dataset across versions.
    pub item_id: String,
    pub extension: String,
}

const EXTENSIONS: [&str; 3] = ["cdf", "fits", "bin"];

impl DatasetFilename {
    /// Parses a dataset filename; `None` means the name is not recognized.
    pub fn parse(name: &str) -> Option<DatasetFilename> {
        let (stem, extension) = name.rsplit_once('.')?;
        if !EXTENSIONS.contains(&extension) {
            return None;
        }

        let mut fields = stem.rsplitn(3, '_');
        let version_field = fields.next()?;
        let time_interval = fields.next()?;
        let dsid_field = fields.next()?;

        let version = parse_version_field(version_field)?;
        let time_vector = parse_time_interval(time_interval).ok()?;

        let dsid_field = dsid_field
            .strip_suffix("-cdag")
            .or_else(|| dsid_field.strip_suffix("-CDAG"))
            .unwrap_or(dsid_field);
        // The DSID part of the grammar is unconstrained; validity is
        // checked where it matters, in placement and subset selection.
        let dsid = dsid_field.to_uppercase();

        let item_id = format!("{}_{time_interval}", canonical_item_casing(&dsid));

        Some(DatasetFilename {
            dsid,
            time_interval: time_interval.to_string(),
            version,
            time_vector,
            item_id,
            extension: extension.to_string(),
        })
    }

    /// Begin time derived from the filename; `None` for onboard-tick intervals.
    pub fn begin_time(&self) -> Option<DateTime<Utc>> {
        self.time_vector.to_datetime()
    }

    /// Canonical rendering, `<item_id>_V<NN>.<ext>`.
    pub fn render(&self) -> String {
        format!("{}_V{:02}.{}", self.item_id, self.version, self.extension)
    }
}

/// `V` followed by two or more digits and an optional C, I or U letter.
fn parse_version_field(field: &str) -> Option<u32> {
    let digits = field.strip_prefix('V')?;
    let digits = digits
        .strip_suffix(['C', 'I', 'U'])
        .unwrap_or(digits);
    if digits.len() < 2 || !all_digits(digits) {
        return None;
    }
    digits.parse().ok()
}

/// Item-id casing: source and descriptor lowercase, level token as-is.
fn canonical_item_casing(dsid: &str) -> String {
    let mut parts = dsid.splitn(3, '_');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(source), Some(level), Some(descriptor)) => format!(
            "{}_{}_{}",
            source.to_lowercase(),
            level,
            descriptor.to_lowercase()
        ),
        _ => dsid.to_lowercase(),
    }
}

/// Derives the uppercase DSID from an item identifier.
pub fn dsid_of_item_id(item_id: &str) -> Result<Dsid, MirrorError> {
    let (dsid_part, interval) = item_id
        .rsplit_once('_')
        .ok_or_else(|| MirrorError::InvalidItemId(item_id.to_string()))?;
    parse_time_interval(interval)
        .map_err(|_| MirrorError::InvalidItemId(item_id.to_string()))?;
    dsid_part
        .to_uppercase()
        .parse::<Dsid>()
        .map_err(|_| MirrorError::InvalidItemId(item_id.to_string()))
}

/// Level token of an item identifier, used for download endpoint routing.
pub fn item_id_level_token(item_id: &str) -> Result<String, MirrorError> {
    item_id
        .split('_')
        .nth(1)
        .filter(|token| !token.is_empty())
        .map(|token| token.to_uppercase())
        .ok_or_else(|| MirrorError::InvalidItemId(item_id.to_string()))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_dsid_fields() {
        let dsid: Dsid = "SOLO_L2_RPW-LFR-SBM2-CWF-E".parse().unwrap();
        assert_eq!(dsid.source, "SOLO");
        assert_eq!(dsid.level, Level::L2);
        assert_eq!(dsid.instrument, "RPW");
        assert_eq!(dsid.descriptor, "RPW-LFR-SBM2-CWF-E");
    }

    #[test]
    fn parse_dsid_rejects_cdag() {
        let err = "SOLO_L2_RPW-LFR-SBM2-CWF-E-CDAG".parse::<Dsid>().unwrap_err();
        assert_matches!(err, MirrorError::CdagInDsid(_));
    }

    #[test]
    fn parse_dsid_rejects_lowercase() {
        let err = "solo_L2_rpw-lfr-sbm2-cwf-e".parse::<Dsid>().unwrap_err();
        assert_matches!(err, MirrorError::InvalidDsid(_));
    }

    #[test]
    fn time_interval_day() {
        let tv = parse_time_interval("20200213").unwrap();
        assert_matches!(
            tv,
            TimeVector::Calendar {
                year: 2020,
                month: 2,
                day: 13,
                ..
            }
        );
    }

    #[test]
    fn time_interval_range() {
        let tv = parse_time_interval("20200213-20200214").unwrap();
        assert_matches!(tv, TimeVector::Calendar { day: 13, .. });
    }

    #[test]
    fn time_interval_subseconds() {
        let tv = parse_time_interval("20220621T000205123").unwrap();
        match tv {
            TimeVector::Calendar { second, .. } => assert!((second - 5.123).abs() < 1e-9),
            other => panic!("unexpected vector {other:?}"),
        }
    }

    #[test]
    fn time_interval_onboard() {
        let tv = parse_time_interval("0660160022-0660246422").unwrap();
        assert_eq!(tv, TimeVector::Onboard(660160022));
    }

    #[test]
    fn time_interval_garbage() {
        assert!(parse_time_interval("2020021").is_err());
        assert!(parse_time_interval("20201313").is_err());
        assert!(parse_time_interval("not-a-date").is_err());
    }

    #[test]
    fn parse_filename_plain() {
        let parsed =
            DatasetFilename::parse("solo_L1_epd-sis-a-rates-slow_20200813_V02.cdf").unwrap();
        assert_eq!(parsed.dsid, "SOLO_L1_EPD-SIS-A-RATES-SLOW");
        assert_eq!(parsed.version, 2);
        assert_eq!(parsed.item_id, "solo_L1_epd-sis-a-rates-slow_20200813");
        assert_eq!(parsed.extension, "cdf");
    }

    #[test]
    fn parse_filename_strips_cdag() {
        let parsed =
            DatasetFilename::parse("solo_L2_rpw-lfr-surv-cwf-e-cdag_20200213_V05.cdf").unwrap();
        assert_eq!(parsed.dsid, "SOLO_L2_RPW-LFR-SURV-CWF-E");
        assert_eq!(parsed.item_id, "solo_L2_rpw-lfr-surv-cwf-e_20200213");
    }

    #[test]
    fn parse_filename_version_letter() {
        let parsed =
            DatasetFilename::parse("solo_LL02_mag_20220621T000205-20220622T000204_V03I.cdf")
                .unwrap();
        assert_eq!(parsed.version, 3);
        assert_eq!(parsed.dsid, "SOLO_LL02_MAG");
    }

    #[test]
    fn parse_filename_accepts_unknown_level() {
        // The grammar does not constrain the DSID part.
        let parsed = DatasetFilename::parse("solo_L0_swa-eas_20200813_V01.cdf").unwrap();
        assert_eq!(parsed.dsid, "SOLO_L0_SWA-EAS");
        assert_eq!(parsed.item_id, "solo_L0_swa-eas_20200813");
        assert!("SOLO_L0_SWA-EAS".parse::<Dsid>().is_err());
    }

    #[test]
    fn parse_filename_rejects_short_version() {
        assert!(DatasetFilename::parse("solo_L1_mag_20200813_V2.cdf").is_none());
    }

    #[test]
    fn parse_filename_rejects_unknown_extension() {
        assert!(DatasetFilename::parse("solo_L1_mag_20200813_V02.txt").is_none());
        assert!(DatasetFilename::parse("image_20200813.jp2").is_none());
    }

    #[test]
    fn parse_filename_rejects_bad_interval() {
        assert!(DatasetFilename::parse("solo_L1_mag_2020081_V02.cdf").is_none());
    }

    #[test]
    fn round_trip_plain() {
        let name = "solo_L1_epd-sis-a-rates-slow_20200813_V02.cdf";
        let parsed = DatasetFilename::parse(name).unwrap();
        assert_eq!(parsed.render(), name);
    }

    #[test]
    fn round_trip_drops_cdag_and_letter() {
        let parsed =
            DatasetFilename::parse("solo_L2_rpw-lfr-surv-cwf-e-cdag_20200213_V05U.cdf").unwrap();
        assert_eq!(parsed.render(), "solo_L2_rpw-lfr-surv-cwf-e_20200213_V05.cdf");
    }

    #[test]
    fn item_id_helpers() {
        let dsid = dsid_of_item_id("solo_L2_rpw-lfr-surv-cwf-e_20200213").unwrap();
        assert_eq!(dsid.to_string(), "SOLO_L2_RPW-LFR-SURV-CWF-E");
        let level =
            item_id_level_token("solo_LL02_mag_20220621T000205-20220622T000204").unwrap();
        assert_eq!(level, "LL02");
    }

    #[test]
    fn begin_time_millis() {
        let parsed = DatasetFilename::parse("solo_L1_mag_20220621T000205123_V02.cdf").unwrap();
        let begin = parsed.begin_time().unwrap();
        assert_eq!(begin.to_rfc3339(), "2022-06-21T00:02:05.123+00:00");
    }
}
