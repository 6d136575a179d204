//! FTN network addresses (`zone:net/node` or `zone:net/node.point`).

use std::fmt;
use std::str::FromStr;

use crate::FtnMsgError;

/// A 4-D FidoNet address.
///
/// The point component is 0 for plain nodes and is omitted when formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FtnAddress {
    pub zone: u16,
    pub net: u16,
    pub node: u16,
    pub point: u16,
}

impl FtnAddress {
    pub fn new(zone: u16, net: u16, node: u16) -> Self {
        FtnAddress {
            zone,
            net,
            node,
            point: 0,
        }
    }

    /// The 2-D form used in SEEN-BY and PATH lines: `net/node`.
    pub fn two_d(&self) -> String {
        format!("{}/{}", self.net, self.node)
    }

    /// Whether this address names the same node, ignoring zone and point.
    /// Bundle routing matches on `(net, node)` only.
    pub fn same_node(&self, net: u16, node: u16) -> bool {
        self.net == net && self.node == node
    }
}

impl fmt::Display for FtnAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.point == 0 {
            write!(f, "{}:{}/{}", self.zone, self.net, self.node)
        } else {
            write!(f, "{}:{}/{}.{}", self.zone, self.net, self.node, self.point)
        }
    }
}

impl FromStr for FtnAddress {
    type Err = FtnMsgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || FtnMsgError::BadAddress(s.to_string());

        let (zone, rest) = s.split_once(':').ok_or_else(bad)?;
        let (net, rest) = rest.split_once('/').ok_or_else(bad)?;
        let (node, point) = match rest.split_once('.') {
            Some((node, point)) => (node, Some(point)),
            None => (rest, None),
        };

        let parse = |part: &str| -> Result<u16, Self::Err> {
            if part.is_empty() {
                return Err(bad());
            }
            part.parse().map_err(|_| bad())
        };

        Ok(FtnAddress {
            zone: parse(zone)?,
            net: parse(net)?,
            node: parse(node)?,
            point: match point {
                Some(p) => parse(p)?,
                None => 0,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_3d_address() {
        let addr: FtnAddress = "1:103/705".parse().unwrap();
        assert_eq!(addr, FtnAddress::new(1, 103, 705));
    }

    #[test]
    fn parses_4d_address() {
        let addr: FtnAddress = "2:5020/1042.7".parse().unwrap();
        assert_eq!(
            addr,
            FtnAddress {
                zone: 2,
                net: 5020,
                node: 1042,
                point: 7
            }
        );
    }

    #[test]
    fn rejects_malformed_addresses() {
        for input in ["", "1:103", "103/705", "1:/705", "1:103/", "a:103/705", "1:103/705.x"] {
            assert!(
                matches!(input.parse::<FtnAddress>(), Err(FtnMsgError::BadAddress(_))),
                "expected BadAddress for {input:?}"
            );
        }
    }

    #[test]
    fn formats_point_only_when_nonzero() {
        assert_eq!(FtnAddress::new(1, 103, 705).to_string(), "1:103/705");
        let point = FtnAddress {
            zone: 1,
            net: 103,
            node: 705,
            point: 3,
        };
        assert_eq!(point.to_string(), "1:103/705.3");
    }

    #[test]
    fn two_d_form() {
        assert_eq!(FtnAddress::new(1, 103, 705).two_d(), "103/705");
    }
}
