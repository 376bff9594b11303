//! Connect-address parsing.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use peerlane_transport::IdentityToken;

use crate::AddressError;

/// Where a client should connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectTarget {
    /// A network address, reached with a direct connection.
    Direct(SocketAddr),
    /// A peer identity, reached through the relay.
    Relay(IdentityToken),
}

/// Interprets a client connect string.
///
/// In order of preference:
///
/// 1. `ip:port` is used as is and `port` is ignored.
/// 2. An IP literal or `localhost` is combined with `port`.
/// 3. A decimal number is a peer identity for a relay connection.
///
/// # Errors
/// Returns [`AddressError`] for anything else, including an empty string.
pub fn parse_target(
    address: &str,
    port: u16,
) -> Result<ConnectTarget, AddressError> {
    let address = address.trim();

    if let Ok(addr) = address.parse::<SocketAddr>() {
        return Ok(ConnectTarget::Direct(addr));
    }
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ConnectTarget::Direct(SocketAddr::new(ip, port)));
    }
    if address.eq_ignore_ascii_case("localhost") {
        return Ok(ConnectTarget::Direct(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
        )));
    }
    address
        .parse::<IdentityToken>()
        .map(ConnectTarget::Relay)
        .map_err(|_| AddressError(address.to_string()))
}

/// Interprets a server bind address. Empty means every interface.
///
/// # Errors
/// Returns [`AddressError`] if the text is not an IP literal or
/// `localhost`.
pub fn parse_bind(address: &str, port: u16) -> Result<SocketAddr, AddressError> {
    let address = address.trim();
    if address.is_empty() {
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }
    match parse_target(address, port)? {
        ConnectTarget::Direct(addr) => Ok(addr),
        ConnectTarget::Relay(_) => Err(AddressError(address.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target_ip_literal_uses_port() {
        assert_eq!(
            parse_target("192.168.1.20", 7777),
            Ok(ConnectTarget::Direct("192.168.1.20:7777".parse().unwrap()))
        );
    }

    #[test]
    fn test_parse_target_socket_address_keeps_its_own_port() {
        assert_eq!(
            parse_target("10.0.0.1:9000", 7777),
            Ok(ConnectTarget::Direct("10.0.0.1:9000".parse().unwrap()))
        );
    }

    #[test]
    fn test_parse_target_ipv6_literal() {
        assert_eq!(
            parse_target("::1", 27015),
            Ok(ConnectTarget::Direct("[::1]:27015".parse().unwrap()))
        );
    }

    #[test]
    fn test_parse_target_localhost_is_loopback() {
        assert_eq!(
            parse_target("localhost", 27015),
            Ok(ConnectTarget::Direct("127.0.0.1:27015".parse().unwrap()))
        );
    }

    #[test]
    fn test_parse_target_decimal_is_relay_identity() {
        assert_eq!(
            parse_target(" 76561197960265729 ", 27015),
            Ok(ConnectTarget::Relay(IdentityToken(76_561_197_960_265_729)))
        );
    }

    #[test]
    fn test_parse_target_garbage_is_error() {
        assert_eq!(
            parse_target("not an address", 27015),
            Err(AddressError("not an address".to_string()))
        );
        assert!(parse_target("", 27015).is_err());
        assert!(parse_target("-5", 27015).is_err());
    }

    #[test]
    fn test_parse_bind_empty_is_all_interfaces() {
        assert_eq!(
            parse_bind("", 27015),
            Ok("0.0.0.0:27015".parse().unwrap())
        );
    }

    #[test]
    fn test_parse_bind_rejects_identity() {
        assert!(parse_bind("12345", 27015).is_err());
    }
}
