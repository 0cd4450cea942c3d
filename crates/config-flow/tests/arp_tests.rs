use std::net::IpAddr;
use std::path::PathBuf;

use config_flow::{parse_arp_table, MacAddress, MacResolver, ProcArpResolver};

const TABLE: &str = include_str!("fixtures/arp_table.txt");

fn ip(value: &str) -> IpAddr {
    value.parse().expect("ip")
}

#[test]
fn finds_completed_entry() {
    let mac = parse_arp_table(TABLE, ip("192.168.1.50")).expect("entry");
    assert_eq!(mac, MacAddress([0xa4, 0xcf, 0x12, 0xb3, 0xc4, 0xd5]));
    assert_eq!(mac.to_string(), "a4:cf:12:b3:c4:d5");
    assert_eq!(mac.compact(), "a4cf12b3c4d5");
    assert_eq!(mac.suffix(), "b3c4d5");
}

#[test]
fn skips_incomplete_and_zero_entries() {
    assert_eq!(parse_arp_table(TABLE, ip("192.168.1.60")), None);
    assert_eq!(parse_arp_table(TABLE, ip("192.168.1.70")), None);
}

#[test]
fn missing_and_ipv6_hosts_have_no_entry() {
    assert_eq!(parse_arp_table(TABLE, ip("192.168.1.99")), None);
    assert_eq!(parse_arp_table(TABLE, ip("fe80::1")), None);
    assert_eq!(parse_arp_table("", ip("192.168.1.50")), None);
}

#[test]
fn mac_parsing_accepts_dashes_and_rejects_garbage() {
    let mac: MacAddress = "A4-CF-12-B3-C4-D5".parse().expect("mac");
    assert_eq!(mac.suffix(), "b3c4d5");
    assert!("a4:cf:12".parse::<MacAddress>().is_err());
    assert!("zz:cf:12:b3:c4:d5".parse::<MacAddress>().is_err());
}

#[test]
fn proc_resolver_reads_table_file() {
    let resolver = ProcArpResolver::new(fixture_path("arp_table.txt"));
    assert_eq!(
        resolver.lookup(ip("192.168.1.1")).map(|mac| mac.compact()),
        Some("3ca62f001122".to_string())
    );

    let missing = ProcArpResolver::new(fixture_path("does-not-exist.txt"));
    assert_eq!(missing.lookup(ip("192.168.1.1")), None);
}

fn fixture_path(name: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    path
}
