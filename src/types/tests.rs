use super::*;

#[test]
fn test_unique_identifier_null() {
    assert!(UniqueIdentifier::NULL.is_null());
    assert!(!UniqueIdentifier::new(0x0011_2233_4455_6677).is_null());
    assert_eq!(UniqueIdentifier::default(), UniqueIdentifier::NULL);
}

#[test]
fn test_unique_identifier_display() {
    let id = UniqueIdentifier::new(0x0011_2233_4455_6677);
    assert_eq!(id.to_string(), "0x0011223344556677");
}

#[test]
fn test_eui64_derivation_embeds_prog_id() {
    let mac = MacAddress::new([0x00, 0x1B, 0x21, 0x99, 0xAA, 0xBB]);
    let id = UniqueIdentifier::from_prog_id(mac, 0x1234);
    assert_eq!(id.value(), 0x001B_2112_3499_AABB);

    // Distinct prog ids on the same interface must not collide
    let other = UniqueIdentifier::from_prog_id(mac, 0x1235);
    assert_ne!(id, other);
}

#[test]
fn test_mac_address_display() {
    let mac = MacAddress::new([0x91, 0xE0, 0xF0, 0x01, 0x00, 0x00]);
    assert_eq!(mac.to_string(), "91:e0:f0:01:00:00");
    assert_eq!(mac, MacAddress::IDENTIFICATION_MULTICAST);
}

#[test]
fn test_fixed_string_roundtrip() {
    let s = AvdeccFixedString::new("Living Room DSP");
    assert_eq!(s.as_str(), "Living Room DSP");
    assert_eq!(AvdeccFixedString::from_buffer(s.as_buffer()), s);
}

#[test]
fn test_fixed_string_truncates_at_char_boundary() {
    // 63 ASCII bytes followed by a 2-byte char that would straddle the limit
    let input = format!("{}é", "x".repeat(63));
    let s = AvdeccFixedString::new(&input);
    assert_eq!(s.as_str(), "x".repeat(63));
    assert_eq!(s.as_buffer()[63], 0);
}

#[test]
fn test_fixed_string_empty() {
    let s = AvdeccFixedString::default();
    assert!(s.is_empty());
    assert_eq!(s.as_str(), "");
}

#[test]
fn test_sampling_rate_hz() {
    let rate = SamplingRate::from_hz(48_000);
    assert_eq!(rate.hz(), 48_000);
}

#[test]
fn test_unique_identifier_json_roundtrip() {
    let id = UniqueIdentifier::new(0xAAAA_AAAA_AAAA_AAAA);
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"0xAAAAAAAAAAAAAAAA\"");
    let back: UniqueIdentifier = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}

#[test]
fn test_config_builder() {
    let config = ControllerConfig::builder()
        .command_timeout(std::time::Duration::from_millis(100))
        .advertise_valid_time(80)
        .build();
    assert_eq!(config.command_timeout, std::time::Duration::from_millis(100));
    // Clamped to the ADP maximum
    assert_eq!(config.advertise_valid_time, 62);
}
