// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Network interface selection.
//!
//! A channel URI may carry an interface hint with a subnet prefix
//! (`interface=192.168.0.0/24`). Candidates are ranked by decreasing match
//! length against the hint; ties keep enumeration order. Multicast channels
//! without a hint fall back to any usable interface, preferring non-loopback.

use std::net::IpAddr;

use crate::error::{Error, Result};

/// An interface hint parsed from a channel URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceSearchAddress {
    pub address: IpAddr,
    pub prefix_length: u32,
}

impl InterfaceSearchAddress {
    pub fn new(address: IpAddr, prefix_length: u32) -> Self {
        Self {
            address,
            prefix_length,
        }
    }

    /// Full-length prefix: the hint names one address exactly.
    pub fn is_exact(&self) -> bool {
        self.prefix_length == address_bits(&self.address)
    }
}

fn address_bits(address: &IpAddr) -> u32 {
    match address {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn address_octets(address: &IpAddr) -> Vec<u8> {
    match address {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

/// Length of the common bit prefix of two addresses of the same family.
pub fn common_prefix_length(a: &IpAddr, b: &IpAddr) -> u32 {
    let a_octets = address_octets(a);
    let b_octets = address_octets(b);
    if a_octets.len() != b_octets.len() {
        return 0;
    }

    let mut length = 0;
    for (x, y) in a_octets.iter().zip(b_octets.iter()) {
        if x == y {
            length += 8;
        } else {
            length += (x ^ y).leading_zeros();
            break;
        }
    }

    length
}

/// Does `candidate` lie within the hint's subnet?
pub fn matches_subnet(candidate: &IpAddr, search: &InterfaceSearchAddress) -> bool {
    if address_bits(candidate) != address_bits(&search.address) {
        return false;
    }

    common_prefix_length(candidate, &search.address) >= search.prefix_length
}

fn enumerate_addresses() -> Vec<IpAddr> {
    match local_ip_address::list_afinet_netifas() {
        Ok(interfaces) => interfaces.into_iter().map(|(_, ip)| ip).collect(),
        Err(e) => {
            log::warn!("[Network] failed to list interfaces: {}", e);
            Vec::new()
        }
    }
}

/// Resolve an interface hint to a concrete local address.
///
/// An exact hint resolves to itself. A subnet hint selects the candidate with
/// the longest common prefix against the hint; ties are broken by
/// enumeration order.
pub fn find_interface_address(search: &InterfaceSearchAddress) -> Result<IpAddr> {
    if search.is_exact() {
        return Ok(search.address);
    }

    rank_candidates(&enumerate_addresses(), search).ok_or_else(|| {
        Error::InvalidChannel(format!(
            "no interface matches {}/{}",
            search.address, search.prefix_length
        ))
    })
}

fn rank_candidates(candidates: &[IpAddr], search: &InterfaceSearchAddress) -> Option<IpAddr> {
    let mut best: Option<(u32, IpAddr)> = None;
    for candidate in candidates {
        if !matches_subnet(candidate, search) {
            continue;
        }

        let match_length = common_prefix_length(candidate, &search.address);
        match best {
            Some((best_length, _)) if best_length >= match_length => {}
            _ => best = Some((match_length, *candidate)),
        }
    }

    best.map(|(_, addr)| addr)
}

/// Default interface for a multicast channel without a hint: any non-loopback
/// interface, else loopback.
pub fn default_multicast_interface() -> IpAddr {
    let candidates = enumerate_addresses();

    for candidate in &candidates {
        if !candidate.is_loopback() {
            return *candidate;
        }
    }

    candidates
        .first()
        .copied()
        .unwrap_or(IpAddr::V4(std::net::Ipv4Addr::LOCALHOST))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn v4(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(a, b, c, d))
    }

    #[test]
    fn test_common_prefix_length() {
        assert_eq!(common_prefix_length(&v4(127, 0, 0, 1), &v4(127, 0, 0, 1)), 32);
        assert_eq!(common_prefix_length(&v4(127, 0, 0, 0), &v4(127, 0, 0, 1)), 31);
        assert_eq!(common_prefix_length(&v4(192, 168, 0, 1), &v4(192, 168, 1, 1)), 23);
        assert_eq!(common_prefix_length(&v4(10, 0, 0, 1), &v4(192, 0, 0, 1)), 0);
    }

    #[test]
    fn test_matches_subnet() {
        let search = InterfaceSearchAddress::new(v4(192, 168, 0, 0), 24);
        assert!(matches_subnet(&v4(192, 168, 0, 7), &search));
        assert!(!matches_subnet(&v4(192, 168, 1, 7), &search));
        assert!(!matches_subnet(&"::1".parse().unwrap(), &search));
    }

    #[test]
    fn test_rank_prefers_longest_match() {
        let search = InterfaceSearchAddress::new(v4(192, 168, 0, 200), 16);
        let candidates = [v4(192, 168, 1, 1), v4(192, 168, 0, 1), v4(10, 0, 0, 1)];

        assert_eq!(rank_candidates(&candidates, &search), Some(v4(192, 168, 0, 1)));
    }

    #[test]
    fn test_rank_ties_keep_registration_order() {
        let search = InterfaceSearchAddress::new(v4(192, 168, 0, 0), 16);
        let candidates = [v4(192, 168, 1, 1), v4(192, 168, 1, 2)];

        assert_eq!(rank_candidates(&candidates, &search), Some(v4(192, 168, 1, 1)));
    }

    #[test]
    fn test_exact_hint_resolves_to_itself() {
        let search = InterfaceSearchAddress::new(v4(127, 0, 0, 1), 32);
        assert!(search.is_exact());
        assert_eq!(find_interface_address(&search).unwrap(), v4(127, 0, 0, 1));
    }

    #[test]
    fn test_no_match_is_invalid_channel() {
        let search = InterfaceSearchAddress::new(v4(203, 0, 113, 0), 30);
        assert!(rank_candidates(&[v4(10, 0, 0, 1)], &search).is_none());
    }
}
