use cert_scan_rs::range::{enumerate_hosts, RangeError};
use std::net::Ipv4Addr;

#[test]
fn single_host_prefix() {
    let hosts = enumerate_hosts("192.168.10.110/32").expect("valid range");
    assert_eq!(hosts, vec![Ipv4Addr::new(192, 168, 10, 110)]);
}

#[test]
fn slash_24_drops_network_and_broadcast() {
    let hosts = enumerate_hosts("192.168.10.0/24").expect("valid range");
    assert_eq!(hosts.len(), 254);
    assert_eq!(hosts[0], Ipv4Addr::new(192, 168, 10, 1));
    assert_eq!(hosts[253], Ipv4Addr::new(192, 168, 10, 254));
}

#[test]
fn slash_16_is_ascending() {
    let hosts = enumerate_hosts("192.168.0.0/16").expect("valid range");
    assert_eq!(hosts.len(), 65534);
    assert_eq!(hosts.first(), Some(&Ipv4Addr::new(192, 168, 0, 1)));
    assert_eq!(hosts.last(), Some(&Ipv4Addr::new(192, 168, 255, 254)));
    assert!(hosts.windows(2).all(|w| u32::from(w[0]) + 1 == u32::from(w[1])));
}

#[test]
fn missing_prefix_is_invalid() {
    let err = enumerate_hosts("192.168.10.0").unwrap_err();
    let RangeError::InvalidRange { range, .. } = &err;
    assert_eq!(range, "192.168.10.0");
    assert!(err.to_string().starts_with("invalid CIDR address: 192.168.10.0"));
}

#[test]
fn every_short_prefix_excludes_exactly_two() {
    for prefix in 20u8..=30 {
        let hosts = enumerate_hosts(&format!("10.20.0.0/{prefix}")).expect("valid range");
        let size = 1usize << (32 - prefix);
        assert_eq!(hosts.len(), size - 2, "prefix /{prefix}");
        assert_eq!(hosts[0], Ipv4Addr::new(10, 20, 0, 1));
    }
}
