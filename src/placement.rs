use camino::Utf8PathBuf;

use crate::domain::{DatasetFilename, Dsid, Level, TimeVector};
use crate::error::MirrorError;

/// Fallback used for L2/L3 datasets whose DSID is not in the tdn table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TdnFallback {
    /// Lowercased full descriptor, e.g. `mag-rtn-normal`.
    Descriptor,
    /// Lowercased descriptor with the instrument and receiver tokens
    /// stripped, e.g. `RPW-LFR-SURV-BP1` -> `surv-bp1`.
    DescriptorTail,
}

/// Type-directory names for the curated instrument, tabulated explicitly.
///
/// RPW is covered exhaustively: an RPW L2/L3 DSID missing from this table is
/// an error rather than a fallback, so newly published RPW datasets must be
/// filed deliberately. Other instruments route through the fallback rule.
const TDN_TABLE: &[(&[&str], &str)] = &[
    (
        &[
            "SOLO_L2_RPW-LFR-SURV-CWF-E",
            "SOLO_L2_RPW-LFR-SURV-CWF-E-1-SECOND",
            "SOLO_L2_RPW-LFR-SURV-SWF-E",
            "SOLO_L2_RPW-LFR-SBM1-CWF-E",
            "SOLO_L2_RPW-LFR-SBM2-CWF-E",
        ],
        "lfr_wf_e",
    ),
    (
        &["SOLO_L2_RPW-LFR-SURV-BP1", "SOLO_L2_RPW-LFR-SURV-BP2"],
        "lfr_bp",
    ),
    (
        &[
            "SOLO_L2_RPW-TDS-LFM-CWF-E",
            "SOLO_L2_RPW-TDS-LFM-RSWF-E",
            "SOLO_L2_RPW-TDS-SURV-TSWF-E",
            "SOLO_L2_RPW-TDS-SURV-RSWF-E",
        ],
        "tds_wf_e",
    ),
    (&["SOLO_L2_RPW-HFR-SURV"], "hfr"),
    (&["SOLO_L2_RPW-TNR-SURV"], "tnr"),
    (
        &["SOLO_L3_RPW-BIA-EFIELD", "SOLO_L3_RPW-BIA-EFIELD-10-SECONDS"],
        "lfr_efield",
    ),
    (
        &[
            "SOLO_L3_RPW-BIA-DENSITY",
            "SOLO_L3_RPW-BIA-DENSITY-10-SECONDS",
        ],
        "lfr_density",
    ),
    (
        &["SOLO_L3_RPW-BIA-SCPOT", "SOLO_L3_RPW-BIA-SCPOT-10-SECONDS"],
        "lfr_scpot",
    ),
    (&["SOLO_L3_RPW-TNR-FP"], "tnr_fp"),
];

/// Instrument whose DSIDs the table covers exhaustively.
const TABULATED_INSTRUMENT: &str = "RPW";

/// Type-directory name for an L2/L3 DSID.
pub fn type_dir_name(dsid: &Dsid, fallback: TdnFallback) -> Result<String, MirrorError> {
    let token = dsid.to_string();
    for (dsids, tdn) in TDN_TABLE {
        if dsids.contains(&token.as_str()) {
            return Ok((*tdn).to_string());
        }
    }
    if dsid.instrument == TABULATED_INSTRUMENT {
        return Err(MirrorError::PlacementUnsupported(token));
    }
    let tdn = match fallback {
        TdnFallback::Descriptor => dsid.descriptor.to_lowercase(),
        TdnFallback::DescriptorTail => descriptor_tail(&dsid.descriptor).to_lowercase(),
    };
    Ok(tdn)
}

fn descriptor_tail(descriptor: &str) -> String {
    let segments: Vec<&str> = descriptor.split('-').collect();
    let dropped = if segments.len() > 2 { 2 } else { 1 };
    if segments.len() <= dropped {
        return descriptor.to_string();
    }
    segments[dropped..].join("-")
}

/// Relative placement path for a recognized dataset filename.
pub fn placement_path(
    parsed: &DatasetFilename,
    fallback: TdnFallback,
) -> Result<Utf8PathBuf, MirrorError> {
    let dsid: Dsid = parsed.dsid.parse()?;
    let (year, month, day) = match parsed.time_vector {
        TimeVector::Calendar {
            year, month, day, ..
        } => (year, month, day),
        TimeVector::Onboard(_) => {
            return Err(MirrorError::PlacementUnsupported(parsed.dsid.clone()));
        }
    };
    let instrument = dsid.instrument.to_lowercase();
    let level = dsid.level.as_str();

    match dsid.level {
        Level::L2 | Level::L3 => {
            let tdn = type_dir_name(&dsid, fallback)?;
            Ok(Utf8PathBuf::from(format!(
                "{instrument}/{level}/{tdn}/{year:04}/{month:02}"
            )))
        }
        Level::Ll02 | Level::Ll03 | Level::L1 | Level::L1R => Ok(Utf8PathBuf::from(format!(
            "{instrument}/{level}/{year:04}/{month:02}/{day:02}"
        ))),
        Level::Hk => Err(MirrorError::PlacementUnsupported(parsed.dsid.clone())),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::domain::DatasetFilename;

    fn parse(name: &str) -> DatasetFilename {
        DatasetFilename::parse(name).unwrap()
    }

    #[test]
    fn tabulated_tdn_beats_fallback() {
        let path = placement_path(
            &parse("solo_L2_rpw-lfr-surv-bp1_20201001_V02.cdf"),
            TdnFallback::DescriptorTail,
        )
        .unwrap();
        assert_eq!(path, Utf8PathBuf::from("rpw/L2/lfr_bp/2020/10"));
    }

    #[test]
    fn lfr_waveforms_share_a_tdn() {
        for name in [
            "solo_L2_rpw-lfr-surv-cwf-e_20200213_V05.cdf",
            "solo_L2_rpw-lfr-surv-swf-e_20200213_V05.cdf",
            "solo_L2_rpw-lfr-sbm1-cwf-e_20200213_V05.cdf",
            "solo_L2_rpw-lfr-sbm2-cwf-e_20200213_V05.cdf",
            "solo_L2_rpw-lfr-surv-cwf-e-1-second_20200213_V05.cdf",
        ] {
            let path = placement_path(&parse(name), TdnFallback::DescriptorTail).unwrap();
            assert_eq!(path, Utf8PathBuf::from("rpw/L2/lfr_wf_e/2020/02"));
        }
    }

    #[test]
    fn uncovered_rpw_dataset_is_an_error() {
        let err = placement_path(
            &parse("solo_L2_rpw-mystery-product_20200213_V05.cdf"),
            TdnFallback::DescriptorTail,
        )
        .unwrap_err();
        assert_matches!(err, MirrorError::PlacementUnsupported(_));
    }

    #[test]
    fn other_instruments_use_fallback() {
        let path = placement_path(
            &parse("solo_L2_mag-rtn-normal_20200813_V02.cdf"),
            TdnFallback::Descriptor,
        )
        .unwrap();
        assert_eq!(path, Utf8PathBuf::from("mag/L2/mag-rtn-normal/2020/08"));

        let path = placement_path(
            &parse("solo_L2_epd-sis-a-rates-slow_20200813_V02.cdf"),
            TdnFallback::DescriptorTail,
        )
        .unwrap();
        assert_eq!(path, Utf8PathBuf::from("epd/L2/a-rates-slow/2020/08"));
    }

    #[test]
    fn low_level_datasets_use_daily_layout() {
        let path = placement_path(
            &parse("solo_L1_epd-sis-a-rates-slow_20200813_V02.cdf"),
            TdnFallback::DescriptorTail,
        )
        .unwrap();
        assert_eq!(path, Utf8PathBuf::from("epd/L1/2020/08/13"));

        let path = placement_path(
            &parse("solo_LL02_mag_20220621T000205-20220622T000204_V03.cdf"),
            TdnFallback::DescriptorTail,
        )
        .unwrap();
        assert_eq!(path, Utf8PathBuf::from("mag/LL02/2022/06/21"));
    }

    #[test]
    fn housekeeping_is_rejected() {
        let err = placement_path(
            &parse("solo_HK_rpw-bia_20200813_V02.cdf"),
            TdnFallback::DescriptorTail,
        )
        .unwrap_err();
        assert_matches!(err, MirrorError::PlacementUnsupported(_));
    }
}
