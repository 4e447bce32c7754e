// ============================================
// File: crates/veiltun-server/src/services/ip_pool.rs
// ============================================
//! # IP Address Pool Service
//!
//! ## Creation Reason
//! Every established tunnel gets a unique client address from the
//! configured range, announced in the TUNNEL_DATA configuration packet.
//!
//! ## Main Functionality
//! - `AddressRange`: parsed IPv4 CIDR block
//! - `IpPoolService`: bitmap-backed first-fit allocation
//! - `IpLease`: an allocation that returns itself to the pool on drop
//!
//! ## IP Allocation Strategy
//! - One bit per host offset
//! - Network, broadcast and gateway addresses are never handed out
//! - First-fit, so released addresses are reused lowest-first
//!
//! ## Example
//! ```
//! use std::sync::Arc;
//! use std::net::Ipv4Addr;
//! use veiltun_server::services::IpPoolService;
//!
//! let pool = Arc::new(IpPoolService::new("10.8.0.0/24".parse().unwrap(),
//!     Ipv4Addr::new(10, 8, 0, 1)).unwrap());
//!
//! let lease = pool.lease().unwrap();
//! assert_eq!(lease.ip(), Ipv4Addr::new(10, 8, 0, 2));
//! drop(lease);
//! assert_eq!(pool.allocated_count(), 0);
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Prefer `lease()`; a bare `allocate()` must be paired with `release()`
//! - The pool does not touch the OS; it only tracks numbers
//!
//! ## Last Modified
//! v0.1.0 - Initial IP pool implementation

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, ServerError};

// ============================================
// AddressRange
// ============================================

/// An IPv4 CIDR block such as `10.8.0.0/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AddressRange {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl AddressRange {
    /// Creates a range, masking off host bits of `network`.
    ///
    /// # Errors
    /// `ConfigInvalid` if `prefix_len > 32`.
    pub fn new(network: Ipv4Addr, prefix_len: u8) -> Result<Self> {
        if prefix_len > 32 {
            return Err(ServerError::config_invalid(
                "address_range",
                "prefix length cannot exceed 32",
            ));
        }
        Ok(Self::from_parts(network, prefix_len))
    }

    /// Infallible form of [`AddressRange::new`] for known-good constants;
    /// `prefix_len` is clamped to 32.
    pub(crate) fn from_parts(network: Ipv4Addr, prefix_len: u8) -> Self {
        let prefix_len = prefix_len.min(32);
        Self {
            network: Ipv4Addr::from(u32::from(network) & Self::mask(prefix_len)),
            prefix_len,
        }
    }

    fn mask(prefix_len: u8) -> u32 {
        if prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(prefix_len))
        }
    }

    /// Network address.
    #[must_use]
    pub const fn network(&self) -> Ipv4Addr {
        self.network
    }

    /// Prefix length.
    #[must_use]
    pub const fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Number of addresses in the block, network and broadcast included.
    #[must_use]
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix_len))
    }

    /// Returns `true` if `ip` lies inside the block.
    #[must_use]
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & Self::mask(self.prefix_len) == u32::from(self.network)
    }

    fn offset_of(&self, ip: Ipv4Addr) -> Option<usize> {
        self.contains(ip)
            .then(|| (u32::from(ip) - u32::from(self.network)) as usize)
    }

    fn ip_at(&self, offset: usize) -> Ipv4Addr {
        // offsets come from the bitmap, which never exceeds the block size
        Ipv4Addr::from(u32::from(self.network) + offset as u32)
    }
}

impl FromStr for AddressRange {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = s.split_once('/').ok_or_else(|| {
            ServerError::config_invalid("address_range", format!("'{s}' is not in CIDR notation"))
        })?;
        let network: Ipv4Addr = addr.trim().parse().map_err(|_| {
            ServerError::config_invalid("address_range", format!("invalid network address '{addr}'"))
        })?;
        let prefix_len: u8 = prefix.trim().parse().map_err(|_| {
            ServerError::config_invalid("address_range", format!("invalid prefix length '{prefix}'"))
        })?;
        Self::new(network, prefix_len)
    }
}

impl TryFrom<String> for AddressRange {
    type Error = ServerError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<AddressRange> for String {
    fn from(range: AddressRange) -> Self {
        range.to_string()
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

// ============================================
// IpPoolService
// ============================================

/// Smallest block with at least one host address besides the gateway.
const MAX_POOL_PREFIX: u8 = 30;

/// Largest block the bitmap will track (a /16).
const MIN_POOL_PREFIX: u8 = 16;

/// Tunnel address pool.
pub struct IpPoolService {
    range: AddressRange,
    gateway: Ipv4Addr,
    /// One bit per offset; set = unavailable.
    bitmap: Mutex<Bitmap>,
}

struct Bitmap {
    words: Vec<u64>,
    allocated: usize,
}

impl Bitmap {
    fn new(bits: usize) -> Self {
        Self {
            words: vec![0; bits.div_ceil(64)],
            allocated: 0,
        }
    }

    fn get(&self, bit: usize) -> bool {
        self.words[bit / 64] & (1 << (bit % 64)) != 0
    }

    fn set(&mut self, bit: usize, value: bool) {
        if value {
            self.words[bit / 64] |= 1 << (bit % 64);
        } else {
            self.words[bit / 64] &= !(1 << (bit % 64));
        }
    }

    fn first_clear(&self, limit: usize) -> Option<usize> {
        self.words.iter().enumerate().find_map(|(i, word)| {
            let bit = i * 64 + word.trailing_ones() as usize;
            (*word != u64::MAX && bit < limit).then_some(bit)
        })
    }
}

impl IpPoolService {
    /// Creates a pool over `range`, reserving `gateway`.
    ///
    /// # Errors
    /// `ConfigInvalid` if the block is too small or too large, or the gateway
    /// is not a host address inside it.
    pub fn new(range: AddressRange, gateway: Ipv4Addr) -> Result<Self> {
        if range.prefix_len() > MAX_POOL_PREFIX {
            return Err(ServerError::config_invalid(
                "tunnel.address_range",
                format!("prefix length must be <= {MAX_POOL_PREFIX} for usable addresses"),
            ));
        }
        if range.prefix_len() < MIN_POOL_PREFIX {
            return Err(ServerError::config_invalid(
                "tunnel.address_range",
                format!("prefix length must be >= {MIN_POOL_PREFIX}"),
            ));
        }

        // size is at most 2^16 here
        let size = range.size() as usize;
        let gateway_offset = range.offset_of(gateway).ok_or_else(|| {
            ServerError::config_invalid("tunnel.gateway", "gateway address is not in address range")
        })?;
        if gateway_offset == 0 || gateway_offset == size - 1 {
            return Err(ServerError::config_invalid(
                "tunnel.gateway",
                "gateway cannot be the network or broadcast address",
            ));
        }

        let mut bitmap = Bitmap::new(size);
        for reserved in [0, gateway_offset, size - 1] {
            bitmap.set(reserved, true);
        }

        debug!(%range, %gateway, capacity = size - 3, "IP pool initialized");

        Ok(Self {
            range,
            gateway,
            bitmap: Mutex::new(bitmap),
        })
    }

    /// Allocates the lowest free address.
    ///
    /// # Errors
    /// `IpPoolExhausted` if every host address is in use.
    pub fn allocate(&self) -> Result<Ipv4Addr> {
        let mut bitmap = self.bitmap.lock();
        let size = self.range.size() as usize;

        let Some(offset) = bitmap.first_clear(size) else {
            warn!(in_use = bitmap.allocated, "IP pool exhausted");
            return Err(ServerError::IpPoolExhausted);
        };

        bitmap.set(offset, true);
        bitmap.allocated += 1;
        let ip = self.range.ip_at(offset);
        debug!(%ip, in_use = bitmap.allocated, "Allocated IP");
        Ok(ip)
    }

    /// Allocates an address that is released when the lease drops.
    ///
    /// # Errors
    /// `IpPoolExhausted` if every host address is in use.
    pub fn lease(self: &Arc<Self>) -> Result<IpLease> {
        let ip = self.allocate()?;
        Ok(IpLease {
            pool: Arc::clone(self),
            ip,
        })
    }

    /// Returns an address to the pool.
    ///
    /// Returns `false` if `ip` was not allocated.
    pub fn release(&self, ip: Ipv4Addr) -> bool {
        let Some(offset) = self.host_offset(ip) else {
            warn!(%ip, "Attempted to release address outside pool");
            return false;
        };

        let mut bitmap = self.bitmap.lock();
        if !bitmap.get(offset) {
            warn!(%ip, "Attempted to release unallocated IP");
            return false;
        }
        bitmap.set(offset, false);
        bitmap.allocated -= 1;
        debug!(%ip, in_use = bitmap.allocated, "Released IP");
        true
    }

    /// Checks if an address is currently allocated.
    #[must_use]
    pub fn is_allocated(&self, ip: Ipv4Addr) -> bool {
        self.host_offset(ip)
            .is_some_and(|offset| self.bitmap.lock().get(offset))
    }

    /// Number of allocated addresses.
    #[must_use]
    pub fn allocated_count(&self) -> usize {
        self.bitmap.lock().allocated
    }

    /// Number of addresses the pool can hand out in total.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.range.size() as usize - 3
    }

    /// Number of addresses still free.
    #[must_use]
    pub fn available_count(&self) -> usize {
        self.capacity() - self.allocated_count()
    }

    /// The configured block.
    #[must_use]
    pub const fn range(&self) -> AddressRange {
        self.range
    }

    /// The reserved server-side address.
    #[must_use]
    pub const fn gateway(&self) -> Ipv4Addr {
        self.gateway
    }

    /// Offset of an allocatable host address, or `None`.
    fn host_offset(&self, ip: Ipv4Addr) -> Option<usize> {
        let offset = self.range.offset_of(ip)?;
        let size = self.range.size() as usize;
        (offset != 0 && offset != size - 1 && ip != self.gateway).then_some(offset)
    }
}

impl fmt::Debug for IpPoolService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpPoolService")
            .field("range", &self.range.to_string())
            .field("gateway", &self.gateway)
            .field("allocated", &self.allocated_count())
            .field("capacity", &self.capacity())
            .finish()
    }
}

// ============================================
// IpLease
// ============================================

/// An allocated address, returned to the pool on drop.
pub struct IpLease {
    pool: Arc<IpPoolService>,
    ip: Ipv4Addr,
}

impl IpLease {
    /// The leased address.
    #[must_use]
    pub const fn ip(&self) -> Ipv4Addr {
        self.ip
    }
}

impl Drop for IpLease {
    fn drop(&mut self) {
        self.pool.release(self.ip);
    }
}

impl fmt::Debug for IpLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("IpLease").field(&self.ip).finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_pool() -> Arc<IpPoolService> {
        Arc::new(
            IpPoolService::new("10.8.0.0/24".parse().unwrap(), Ipv4Addr::new(10, 8, 0, 1))
                .unwrap(),
        )
    }

    #[test]
    fn test_range_parsing() {
        let range: AddressRange = "10.8.0.77/24".parse().unwrap();
        assert_eq!(range.network(), Ipv4Addr::new(10, 8, 0, 0));
        assert_eq!(range.to_string(), "10.8.0.0/24");
        assert!(range.contains(Ipv4Addr::new(10, 8, 0, 255)));
        assert!(!range.contains(Ipv4Addr::new(10, 8, 1, 0)));

        assert!("10.8.0.0".parse::<AddressRange>().is_err());
        assert!("10.8.0.0/33".parse::<AddressRange>().is_err());
        assert!("ten/8".parse::<AddressRange>().is_err());
        assert_eq!("0.0.0.0/0".parse::<AddressRange>().unwrap().size(), 1 << 32);
    }

    #[test]
    fn test_pool_creation() {
        let pool = create_test_pool();
        assert_eq!(pool.gateway(), Ipv4Addr::new(10, 8, 0, 1));
        assert_eq!(pool.allocated_count(), 0);
        // 256 - network - broadcast - gateway
        assert_eq!(pool.capacity(), 253);
    }

    #[test]
    fn test_allocate_first_fit() {
        let pool = create_test_pool();

        let ip1 = pool.allocate().unwrap();
        let ip2 = pool.allocate().unwrap();
        assert_eq!(ip1, Ipv4Addr::new(10, 8, 0, 2));
        assert_eq!(ip2, Ipv4Addr::new(10, 8, 0, 3));

        assert!(pool.release(ip1));
        assert_eq!(pool.allocate().unwrap(), ip1);
    }

    #[test]
    fn test_release_rules() {
        let pool = create_test_pool();
        assert!(!pool.release(Ipv4Addr::new(10, 8, 0, 100)));
        assert!(!pool.release(Ipv4Addr::new(10, 8, 0, 1)));
        assert!(!pool.release(Ipv4Addr::new(192, 168, 0, 1)));
        assert!(!pool.is_allocated(Ipv4Addr::new(10, 8, 0, 1)));
    }

    #[test]
    fn test_lease_releases_on_drop() {
        let pool = create_test_pool();
        let lease = pool.lease().unwrap();
        assert!(pool.is_allocated(lease.ip()));
        assert_eq!(pool.available_count(), 252);

        let ip = lease.ip();
        drop(lease);
        assert!(!pool.is_allocated(ip));
        assert_eq!(pool.available_count(), 253);
    }

    #[test]
    fn test_pool_exhaustion() {
        // /30: network, gateway, one host, broadcast
        let pool =
            IpPoolService::new("10.0.0.0/30".parse().unwrap(), Ipv4Addr::new(10, 0, 0, 1)).unwrap();

        assert_eq!(pool.allocate().unwrap(), Ipv4Addr::new(10, 0, 0, 2));
        assert!(matches!(pool.allocate(), Err(ServerError::IpPoolExhausted)));
    }

    #[test]
    fn test_gateway_validation() {
        let range: AddressRange = "10.0.0.0/24".parse().unwrap();
        assert!(IpPoolService::new(range, Ipv4Addr::new(192, 168, 0, 1)).is_err());
        assert!(IpPoolService::new(range, Ipv4Addr::new(10, 0, 0, 0)).is_err());
        assert!(IpPoolService::new(range, Ipv4Addr::new(10, 0, 0, 255)).is_err());
    }

    #[test]
    fn test_prefix_bounds() {
        let gw = Ipv4Addr::new(10, 0, 0, 1);
        assert!(IpPoolService::new("10.0.0.0/31".parse().unwrap(), gw).is_err());
        assert!(IpPoolService::new("10.0.0.0/8".parse().unwrap(), gw).is_err());
        assert!(IpPoolService::new("10.0.0.0/16".parse().unwrap(), gw).is_ok());
    }

    #[test]
    fn test_gateway_in_middle_is_skipped() {
        let pool =
            IpPoolService::new("10.0.0.0/29".parse().unwrap(), Ipv4Addr::new(10, 0, 0, 3)).unwrap();
        let ips: Vec<_> = (0..5).map(|_| pool.allocate().unwrap()).collect();
        assert_eq!(
            ips,
            vec![
                Ipv4Addr::new(10, 0, 0, 1),
                Ipv4Addr::new(10, 0, 0, 2),
                Ipv4Addr::new(10, 0, 0, 4),
                Ipv4Addr::new(10, 0, 0, 5),
                Ipv4Addr::new(10, 0, 0, 6),
            ]
        );
        assert!(pool.allocate().is_err());
    }
}
