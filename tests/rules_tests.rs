use gateway_scan::rules::{generate_candidates, BasePrefix, ScanRule};
use gateway_scan::Error;
use std::net::Ipv4Addr;

#[test]
fn single_subnet_sweep_is_255_candidates() {
    let prefix = BasePrefix::parse("192.168.42.99").unwrap();
    let c = generate_candidates(&prefix, 4022, ScanRule::StatusSubnet).unwrap();
    assert_eq!(c.len(), 255);
    assert_eq!(c[0].to_string(), "192.168.42.1:4022");
    assert_eq!(c[254].to_string(), "192.168.42.255:4022");
}

#[test]
fn explicit_third_octet_range_is_inclusive() {
    let prefix = BasePrefix::parse("10.1.5-9.1").unwrap();
    let c = generate_candidates(&prefix, 80, ScanRule::StatusMultiSubnet).unwrap();
    assert_eq!(c.len(), 5 * 255);
    assert_eq!(c[0].host, Ipv4Addr::new(10, 1, 5, 1));
    assert_eq!(c.last().unwrap().host, Ipv4Addr::new(10, 1, 9, 255));
}

#[test]
fn implied_third_octet_range_spans_eight_subnets() {
    let prefix = BasePrefix::parse("10.1.40.1").unwrap();
    let c = generate_candidates(&prefix, 80, ScanRule::StatMultiSubnet).unwrap();
    assert_eq!(c.len(), 8 * 255);
    assert_eq!(c.last().unwrap().host, Ipv4Addr::new(10, 1, 47, 255));
}

#[test]
fn full_sweep_covers_two_octets() {
    let prefix = BasePrefix::parse("58.19.0.0").unwrap();
    for rule in [ScanRule::StatSweep, ScanRule::StatusFirstMatch] {
        let c = generate_candidates(&prefix, 8888, rule).unwrap();
        assert_eq!(c.len(), 65_280);
        assert_eq!(c[0].host, Ipv4Addr::new(58, 19, 0, 1));
        assert_eq!(c.last().unwrap().host, Ipv4Addr::new(58, 19, 255, 255));
    }
}

#[test]
fn candidates_are_in_ascending_order() {
    let prefix = BasePrefix::parse("10.1.5-7.1").unwrap();
    let c = generate_candidates(&prefix, 80, ScanRule::StatusMultiSubnet).unwrap();
    assert!(c.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn range_is_rejected_for_single_subnet_rules() {
    let prefix = BasePrefix::parse("10.1.5-7.1").unwrap();
    let err = generate_candidates(&prefix, 80, ScanRule::StatusSubnet).unwrap_err();
    assert!(matches!(err, Error::InvalidAddress(_)));
}

#[test]
fn unknown_rule_code_is_rejected() {
    assert!(matches!(ScanRule::try_from(5), Err(Error::InvalidRule(5))));
}
