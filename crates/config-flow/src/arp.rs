//! MAC address lookup through the kernel ARP table.

use std::fmt;
use std::fs;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::debug;

const ATF_COM: u32 = 0x2;

#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|octet| *octet == 0)
    }

    /// Lowercase hex without separators, e.g. `a4cf12b3c4d5`.
    pub fn compact(&self) -> String {
        self.0.iter().map(|octet| format!("{octet:02x}")).collect()
    }

    /// The last three octets, which tell meters of one vendor apart.
    pub fn suffix(&self) -> String {
        self.0[3..].iter().map(|octet| format!("{octet:02x}")).collect()
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddress {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = value.split([':', '-']).collect();
        if parts.len() != 6 {
            return Err(format!("invalid mac address {value:?}"));
        }
        let mut octets = [0u8; 6];
        for (octet, part) in octets.iter_mut().zip(parts) {
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| format!("invalid mac address {value:?}"))?;
        }
        Ok(MacAddress(octets))
    }
}

/// Resolves the hardware address of a host on the local network.
pub trait MacResolver {
    fn lookup(&self, ip: IpAddr) -> Option<MacAddress>;
}

/// Reads `/proc/net/arp`; the test connection beforehand populates the entry.
#[derive(Debug, Clone)]
pub struct ProcArpResolver {
    path: PathBuf,
}

impl ProcArpResolver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for ProcArpResolver {
    fn default() -> Self {
        Self::new("/proc/net/arp")
    }
}

impl MacResolver for ProcArpResolver {
    fn lookup(&self, ip: IpAddr) -> Option<MacAddress> {
        match fs::read_to_string(&self.path) {
            Ok(table) => parse_arp_table(&table, ip),
            Err(err) => {
                debug!(path = %self.path.display(), error = %err, "arp table unreadable");
                None
            }
        }
    }
}

/// Finds the completed entry for `ip` in the text form of the kernel ARP table.
pub fn parse_arp_table(table: &str, ip: IpAddr) -> Option<MacAddress> {
    let IpAddr::V4(ip) = ip else {
        return None;
    };
    let wanted = ip.to_string();

    table.lines().skip(1).find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 || fields[0] != wanted {
            return None;
        }
        let flags = u32::from_str_radix(fields[2].trim_start_matches("0x"), 16).ok()?;
        if flags & ATF_COM == 0 {
            return None;
        }
        fields[3].parse::<MacAddress>().ok().filter(|mac| !mac.is_zero())
    })
}
