// src/radius/attributes.rs
//! Vendor-specific bandwidth attribute mapping. Each NAS vendor expresses
//! rate limits differently; the profile below is the neutral form.

use crate::models::Vendor;
use crate::radius::packet::{attr, RadiusPacket};

pub const MIKROTIK_VENDOR_ID: u32 = 14988;
pub const MIKROTIK_RATE_LIMIT: u8 = 8;

pub const WISPR_VENDOR_ID: u32 = 14122;
pub const WISPR_BANDWIDTH_MAX_UP: u8 = 7;
pub const WISPR_BANDWIDTH_MAX_DOWN: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeedProfile {
    pub download_mbps: i32,
    pub upload_mbps: i32,
    pub burst_download_mbps: Option<i32>,
    pub burst_upload_mbps: Option<i32>,
}

impl SpeedProfile {
    pub fn flat(download_mbps: i32, upload_mbps: i32) -> Self {
        Self {
            download_mbps,
            upload_mbps,
            burst_download_mbps: None,
            burst_upload_mbps: None,
        }
    }
}

/// Render the rate limit as the (attribute, value) pair stored in radreply
/// for the given vendor.
pub fn format_speed_attribute(vendor: Vendor, profile: &SpeedProfile) -> (String, String) {
    match vendor {
        Vendor::Mikrotik => {
            // rx-rate[/tx-rate] [rx-burst-rate[/tx-burst-rate]] from the NAS
            // point of view: rx = customer upload, tx = customer download.
            let mut value = format!("{}M/{}M", profile.upload_mbps, profile.download_mbps);
            if let (Some(bd), Some(bu)) = (profile.burst_download_mbps, profile.burst_upload_mbps) {
                value.push_str(&format!(" {}M/{}M", bu, bd));
            }
            ("Mikrotik-Rate-Limit".to_string(), value)
        }
        Vendor::Ubiquiti => (
            "WISPr-Bandwidth-Max-Down".to_string(),
            // WISPr carries bits per second
            format!("{}", profile.download_mbps as i64 * 1_000_000),
        ),
        Vendor::Juniper => (
            "ERX-Qos-Profile-Name".to_string(),
            format!("profile-{}M-{}M", profile.download_mbps, profile.upload_mbps),
        ),
        Vendor::Unknown => (
            "Filter-Id".to_string(),
            format!("speed-{}M-{}M", profile.download_mbps, profile.upload_mbps),
        ),
    }
}

/// Push the vendor's rate-limit attributes onto a CoA packet.
pub fn apply_bandwidth(packet: &mut RadiusPacket, vendor: Vendor, profile: &SpeedProfile) {
    match vendor {
        Vendor::Mikrotik => {
            let (_, value) = format_speed_attribute(vendor, profile);
            packet.add_vsa(MIKROTIK_VENDOR_ID, MIKROTIK_RATE_LIMIT, value.as_bytes());
        }
        Vendor::Ubiquiti => {
            let down = (profile.download_mbps as u32).saturating_mul(1_000_000);
            let up = (profile.upload_mbps as u32).saturating_mul(1_000_000);
            packet.add_vsa(WISPR_VENDOR_ID, WISPR_BANDWIDTH_MAX_DOWN, &down.to_be_bytes());
            packet.add_vsa(WISPR_VENDOR_ID, WISPR_BANDWIDTH_MAX_UP, &up.to_be_bytes());
        }
        Vendor::Juniper | Vendor::Unknown => {
            let (_, value) = format_speed_attribute(vendor, profile);
            packet.add_string(attr::FILTER_ID, &value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mikrotik_rate_limit_format() {
        let (attr_name, value) = format_speed_attribute(
            Vendor::Mikrotik,
            &SpeedProfile {
                download_mbps: 10,
                upload_mbps: 5,
                burst_download_mbps: Some(20),
                burst_upload_mbps: Some(10),
            },
        );
        assert_eq!(attr_name, "Mikrotik-Rate-Limit");
        assert_eq!(value, "5M/10M 10M/20M");
    }

    #[test]
    fn test_mikrotik_without_burst() {
        let (_, value) = format_speed_attribute(Vendor::Mikrotik, &SpeedProfile::flat(25, 10));
        assert_eq!(value, "10M/25M");
    }

    #[test]
    fn test_ubiquiti_is_bits_per_second() {
        let (attr_name, value) = format_speed_attribute(Vendor::Ubiquiti, &SpeedProfile::flat(10, 5));
        assert_eq!(attr_name, "WISPr-Bandwidth-Max-Down");
        assert_eq!(value, "10000000");
    }

    #[test]
    fn test_unknown_vendor_falls_back_to_filter_id() {
        let (attr_name, value) = format_speed_attribute(Vendor::Unknown, &SpeedProfile::flat(10, 5));
        assert_eq!(attr_name, "Filter-Id");
        assert_eq!(value, "speed-10M-5M");
    }

    #[test]
    fn test_apply_bandwidth_ubiquiti_emits_both_directions() {
        let mut packet = RadiusPacket::new(crate::radius::packet::PacketCode::CoaRequest);
        apply_bandwidth(&mut packet, Vendor::Ubiquiti, &SpeedProfile::flat(10, 5));
        assert_eq!(packet.attributes.len(), 2);
    }
}
