use cert_scan_rs::ports::parse_port_list;

#[test]
fn parse_single_and_ranges() {
    let ports = parse_port_list("443, 8443-8445,636,8444").expect("parse ok");
    // Dedup, preserve order of first appearance
    assert_eq!(ports, vec![443, 8443, 8444, 8445, 636]);
}

#[test]
fn invalid_port_rejected() {
    assert!(parse_port_list("0").is_err());
    assert!(parse_port_list("443,ldaps").is_err());
}
