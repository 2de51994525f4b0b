//! Address range expansion: dotted-quad <-> integer conversion, range to CIDR
//! decomposition and enumeration of every address inside a block.

use crate::error::RangeError;
use ipnet::{IpNet, Ipv4Net};
use std::fmt;
use std::net::Ipv4Addr;
use tokio::sync::mpsc;

/// A power-of-two sized, aligned block of IPv4 addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CidrBlock {
    base: u32,
    prefix: u8,
}

impl CidrBlock {
    /// Build a block from any address inside it; host bits are cleared.
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self, RangeError> {
        let net = Ipv4Net::new(addr, prefix).map_err(|e| RangeError::InvalidCidr {
            text: format!("{}/{}", addr, prefix),
            reason: e.to_string(),
        })?;
        Ok(CidrBlock::from(net.trunc()))
    }

    pub fn base(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.base)
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix
    }

    /// Number of addresses in the block, `2^(32 - prefix)`.
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix))
    }

    pub fn first(&self) -> u32 {
        self.base
    }

    pub fn last(&self) -> u32 {
        (u64::from(self.base) + self.size() - 1) as u32
    }

    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.first() && addr <= self.last()
    }

    /// Every address of the block in ascending order, network and broadcast included.
    pub fn addresses(&self) -> impl Iterator<Item = Ipv4Addr> {
        let start = u64::from(self.base);
        (start..start + self.size()).map(|a| Ipv4Addr::from(a as u32))
    }
}

impl From<Ipv4Net> for CidrBlock {
    fn from(net: Ipv4Net) -> Self {
        CidrBlock { base: u32::from(net.network()), prefix: net.prefix_len() }
    }
}

impl fmt::Display for CidrBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base(), self.prefix)
    }
}

/// Inclusive `start..=end` span of addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    start: u32,
    end: u32,
}

impl AddressRange {
    pub fn new(start: u32, end: u32) -> Result<Self, RangeError> {
        if start > end {
            return Err(RangeError::InvalidRange {
                start: int_to_address(start),
                end: int_to_address(end),
            });
        }
        Ok(AddressRange { start, end })
    }

    /// Parse `a.b.c.d-e.f.g.h`.
    pub fn parse(text: &str) -> Result<Self, RangeError> {
        let (start, end) = text
            .split_once('-')
            .ok_or_else(|| RangeError::InvalidAddress(text.to_string()))?;
        AddressRange::new(address_to_int(start.trim())?, address_to_int(end.trim())?)
    }

    pub fn cidrs(&self) -> Vec<CidrBlock> {
        decompose(self.start, self.end)
    }
}

/// Parse a dotted-quad IPv4 literal into its integer form.
pub fn address_to_int(text: &str) -> Result<u32, RangeError> {
    text.parse::<Ipv4Addr>()
        .map(u32::from)
        .map_err(|_| RangeError::InvalidAddress(text.to_string()))
}

pub fn int_to_address(value: u32) -> String {
    Ipv4Addr::from(value).to_string()
}

/// Split the inclusive range `start..=end` into the fewest aligned CIDR blocks,
/// in ascending order.
pub fn range_to_cidrs(start: u32, end: u32) -> Result<Vec<CidrBlock>, RangeError> {
    Ok(AddressRange::new(start, end)?.cidrs())
}

// Greedy: at each step take the largest power of two that fits in what is left
// and that the cursor is aligned to.
fn decompose(start: u32, end: u32) -> Vec<CidrBlock> {
    let mut blocks = Vec::new();
    let mut cursor = u64::from(start);
    let last = u64::from(end);
    while cursor <= last {
        let remaining = last - cursor + 1;
        let fits = 1u64 << (63 - remaining.leading_zeros());
        let aligned = if cursor == 0 { 1u64 << 32 } else { 1u64 << cursor.trailing_zeros() };
        let size = fits.min(aligned);
        blocks.push(CidrBlock { base: cursor as u32, prefix: 32 - size.trailing_zeros() as u8 });
        cursor += size;
    }
    blocks
}

/// Parse CIDR or bare address text. Bare addresses become single-host blocks.
pub fn parse_cidr(text: &str) -> Result<CidrBlock, RangeError> {
    let text = text.trim();
    let cidr = if text.contains('/') {
        text.to_string()
    } else if text.contains(':') {
        format!("{}/128", text)
    } else {
        format!("{}/32", text)
    };
    let net: IpNet = cidr.parse().map_err(|e: ipnet::AddrParseError| RangeError::InvalidCidr {
        text: cidr.clone(),
        reason: e.to_string(),
    })?;
    match net {
        IpNet::V4(v4) => Ok(CidrBlock::from(v4.trunc())),
        IpNet::V6(_) => Err(RangeError::NotIpv4(cidr)),
    }
}

/// Push every address of `block` into `sink`, waiting on each hand-off.
pub async fn expand_block(block: CidrBlock, sink: &mpsc::Sender<Ipv4Addr>) -> Result<u64, RangeError> {
    for addr in block.addresses() {
        sink.send(addr).await.map_err(|_| RangeError::SinkClosed)?;
    }
    Ok(block.size())
}

/// Expand CIDR (or bare address) text into `sink`. Returns the number of addresses pushed.
pub async fn expand_cidr(text: &str, sink: &mpsc::Sender<Ipv4Addr>) -> Result<u64, RangeError> {
    let block = parse_cidr(text)?;
    expand_block(block, sink).await
}

/// Expand any target form: `start-end` range, CIDR or bare address. Empty text is a no-op.
pub async fn expand_target(text: &str, sink: &mpsc::Sender<Ipv4Addr>) -> Result<u64, RangeError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(0);
    }
    if !text.contains('-') {
        return expand_cidr(text, sink).await;
    }
    let mut total = 0;
    for block in AddressRange::parse(text)?.cidrs() {
        total += expand_block(block, sink).await?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> u32 {
        address_to_int(s).unwrap()
    }

    async fn collect(text: &str) -> Result<Vec<String>, RangeError> {
        let (tx, mut rx) = mpsc::channel(1);
        let owned = text.to_string();
        let producer = tokio::spawn(async move { expand_target(&owned, &tx).await });
        let mut out = Vec::new();
        while let Some(a) = rx.recv().await {
            out.push(a.to_string());
        }
        producer.await.unwrap().map(|_| out)
    }

    fn assert_partition(start: u32, end: u32) {
        let blocks = range_to_cidrs(start, end).unwrap();
        let mut next = u64::from(start);
        for b in &blocks {
            assert_eq!(u64::from(b.first()) % b.size(), 0, "{} is not aligned", b);
            assert_eq!(u64::from(b.first()), next, "gap or overlap before {}", b);
            next = u64::from(b.last()) + 1;
        }
        assert_eq!(next, u64::from(end) + 1);
        // Re-parsing the label must give back the same block.
        for b in &blocks {
            assert_eq!(parse_cidr(&b.to_string()).unwrap(), *b);
        }
    }

    #[test]
    fn address_round_trip() {
        for s in ["0.0.0.0", "10.0.0.1", "192.168.254.3", "255.255.255.255"] {
            assert_eq!(int_to_address(address_to_int(s).unwrap()), s);
        }
        assert_eq!(address_to_int("1.2.3.4").unwrap(), 0x0102_0304);
    }

    #[test]
    fn reject_invalid_address() {
        for s in ["", "10.0.0", "256.1.1.1", "10.0.0.1/24", "::1", "host.local"] {
            assert!(matches!(address_to_int(s), Err(RangeError::InvalidAddress(_))), "{}", s);
        }
    }

    #[test]
    fn aligned_range_is_single_block() {
        let blocks = range_to_cidrs(ip("10.0.0.0"), ip("10.0.0.3")).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].to_string(), "10.0.0.0/30");
    }

    #[test]
    fn unaligned_range_labels_by_start() {
        let blocks: Vec<String> = range_to_cidrs(ip("10.0.0.1"), ip("10.0.0.6"))
            .unwrap()
            .iter()
            .map(|b| b.to_string())
            .collect();
        assert_eq!(blocks, vec!["10.0.0.1/32", "10.0.0.2/31", "10.0.0.4/31", "10.0.0.6/32"]);
    }

    #[test]
    fn whole_space_and_single_address() {
        let all = range_to_cidrs(0, u32::MAX).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].to_string(), "0.0.0.0/0");
        assert_eq!(all[0].size(), 1u64 << 32);

        let one = range_to_cidrs(ip("8.8.8.8"), ip("8.8.8.8")).unwrap();
        assert_eq!(one[0].to_string(), "8.8.8.8/32");
    }

    #[test]
    fn start_after_end_is_rejected() {
        assert!(matches!(
            range_to_cidrs(ip("10.0.0.5"), ip("10.0.0.4")),
            Err(RangeError::InvalidRange { .. })
        ));
    }

    #[test]
    fn decomposition_partitions_every_small_range() {
        for start in 0u32..70 {
            for end in start..140 {
                assert_partition(start, end);
            }
        }
    }

    #[test]
    fn decomposition_partitions_wide_ranges() {
        let cases = [
            ("10.0.0.7", "10.255.3.9"),
            ("0.0.0.1", "255.255.255.254"),
            ("192.168.1.100", "192.168.2.31"),
            ("127.255.255.255", "128.0.0.0"),
            ("1.2.3.4", "255.255.255.255"),
        ];
        for (s, e) in cases {
            assert_partition(ip(s), ip(e));
        }
    }

    #[test]
    fn block_from_inner_address() {
        let b = CidrBlock::new(Ipv4Addr::new(192, 168, 7, 77), 22).unwrap();
        assert_eq!(b.base(), Ipv4Addr::new(192, 168, 4, 0));
        assert_eq!(b.prefix_len(), 22);
        assert_eq!(b.size(), 1024);
        assert!(b.contains(ip("192.168.4.0")));
        assert!(b.contains(ip("192.168.7.255")));
        assert!(!b.contains(ip("192.168.8.0")));
        assert!(!b.contains(ip("192.168.3.255")));
        assert!(CidrBlock::new(Ipv4Addr::LOCALHOST, 33).is_err());
    }

    #[test]
    fn parse_cidr_forms() {
        assert_eq!(parse_cidr("10.0.0.9").unwrap().to_string(), "10.0.0.9/32");
        assert_eq!(parse_cidr(" 10.0.0.5/30 ").unwrap().to_string(), "10.0.0.4/30");
        assert!(matches!(parse_cidr("10.0.0.0/33"), Err(RangeError::InvalidCidr { .. })));
        assert!(matches!(parse_cidr("nope/8"), Err(RangeError::InvalidCidr { .. })));
        assert!(matches!(parse_cidr("fe80::1"), Err(RangeError::NotIpv4(_))));
        assert!(matches!(parse_cidr("2001:db8::/64"), Err(RangeError::NotIpv4(_))));
    }

    #[tokio::test]
    async fn expand_cidr_emits_block_in_order() {
        let got = collect("10.0.0.0/30").await.unwrap();
        assert_eq!(got, vec!["10.0.0.0", "10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    }

    #[tokio::test]
    async fn expand_bare_address_and_range() {
        assert_eq!(collect("172.16.0.1").await.unwrap(), vec!["172.16.0.1"]);
        assert_eq!(
            collect("10.0.0.254-10.0.1.1").await.unwrap(),
            vec!["10.0.0.254", "10.0.0.255", "10.0.1.0", "10.0.1.1"]
        );
        assert!(collect("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expand_rejects_bad_text() {
        assert!(collect("10.0.0.9-10.0.0.1").await.is_err());
        assert!(collect("::/0").await.is_err());
        assert!(collect("10.0.0.0/xx").await.is_err());
    }

    #[tokio::test]
    async fn closed_sink_stops_expansion() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert!(matches!(expand_cidr("10.0.0.0/24", &tx).await, Err(RangeError::SinkClosed)));
    }
}
