//! IPv4 address to integer key conversion.

use std::net::Ipv4Addr;

use crate::error::IpError;

/// Parses a dotted-decimal IPv4 address into its big-endian `u32` form.
///
/// Exactly four octets of decimal digits, each in `0..=255`, are accepted.
/// Leading zeros are tolerated (`"010.0.0.1"`), signs and whitespace are not.
pub fn parse_ipv4(s: &str) -> Result<u32, IpError> {
    if s.is_empty() {
        return Err(IpError::Empty);
    }
    if s.contains(':') {
        return Err(IpError::Ipv6Unsupported(s.to_string()));
    }

    let parts: Vec<&str> = s.split('.').collect();
    if parts.len() != 4 {
        return Err(IpError::OctetCount(parts.len()));
    }

    parts.iter().try_fold(0u32, |acc, part| {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(IpError::InvalidOctet(part.to_string()));
        }
        let octet: u8 = part
            .parse()
            .map_err(|_| IpError::InvalidOctet(part.to_string()))?;
        Ok((acc << 8) | u32::from(octet))
    })
}

/// Converts a dotted-decimal IPv4 address into a `u32` key.
///
/// Any parse failure, including IPv6 input, yields `0`. All such callers
/// therefore share one key.
pub fn ipv4_to_uint(s: &str) -> u32 {
    parse_ipv4(s).unwrap_or_else(|err| {
        tracing::trace!(ip = s, error = %err, "unparseable address keyed as 0");
        0
    })
}

/// Formats a `u32` key as a dotted-decimal IPv4 address.
pub fn uint_to_ipv4(n: u32) -> String {
    Ipv4Addr::from(n).to_string()
}
