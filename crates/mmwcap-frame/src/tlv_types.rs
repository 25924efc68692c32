//! TLV record types carried in sensor telemetry messages.
//!
//! Only [`DETECTED_POINTS`] is decoded; every other type is skipped.

/// Detected objects: rows of (x, y, z, velocity) as `f32`.
pub const DETECTED_POINTS: u32 = 1;

/// Range profile of the zero-Doppler bin.
pub const RANGE_PROFILE: u32 = 2;

/// Noise floor profile.
pub const NOISE_PROFILE: u32 = 3;

/// Azimuth heat map of the zero-Doppler bin.
pub const AZIMUTH_STATIC_HEAT_MAP: u32 = 4;

/// Range/Doppler heat map.
pub const RANGE_DOPPLER_HEAT_MAP: u32 = 5;

/// Processing statistics.
pub const STATS: u32 = 6;

/// Per-point SNR and noise.
pub const DETECTED_POINTS_SIDE_INFO: u32 = 7;

/// Azimuth/elevation heat map of the zero-Doppler bin.
pub const AZIMUTH_ELEVATION_STATIC_HEAT_MAP: u32 = 8;

/// Device temperature report.
pub const TEMPERATURE_STATS: u32 = 9;

/// Returns a human-readable name for a TLV type.
pub fn tlv_type_name(tlv_type: u32) -> &'static str {
    match tlv_type {
        DETECTED_POINTS => "DETECTED_POINTS",
        RANGE_PROFILE => "RANGE_PROFILE",
        NOISE_PROFILE => "NOISE_PROFILE",
        AZIMUTH_STATIC_HEAT_MAP => "AZIMUTH_STATIC_HEAT_MAP",
        RANGE_DOPPLER_HEAT_MAP => "RANGE_DOPPLER_HEAT_MAP",
        STATS => "STATS",
        DETECTED_POINTS_SIDE_INFO => "DETECTED_POINTS_SIDE_INFO",
        AZIMUTH_ELEVATION_STATIC_HEAT_MAP => "AZIMUTH_ELEVATION_STATIC_HEAT_MAP",
        TEMPERATURE_STATS => "TEMPERATURE_STATS",
        _ => "UNKNOWN",
    }
}

/// Returns true if the type is one the sensor firmware documents.
pub fn is_known(tlv_type: u32) -> bool {
    (DETECTED_POINTS..=TEMPERATURE_STATS).contains(&tlv_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(tlv_type_name(DETECTED_POINTS), "DETECTED_POINTS");
        assert_eq!(tlv_type_name(TEMPERATURE_STATS), "TEMPERATURE_STATS");
        assert_eq!(tlv_type_name(0), "UNKNOWN");
        assert_eq!(tlv_type_name(1000), "UNKNOWN");
    }

    #[test]
    fn test_known_range() {
        assert!(is_known(DETECTED_POINTS));
        assert!(is_known(STATS));
        assert!(!is_known(0));
        assert!(!is_known(10));
    }
}
