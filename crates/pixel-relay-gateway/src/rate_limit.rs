//! Per-IP concurrent connection limiter.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

type ActiveMap = Arc<Mutex<HashMap<IpAddr, u32>>>;

/// Caps how many canvas connections a single IP may hold open at once.
pub struct ConnectionLimiter {
    max_connections_per_ip: u32,
    active: ActiveMap,
}

/// Held for the lifetime of one connection. Dropping it frees the slot.
#[derive(Debug)]
pub struct ConnectionPermit {
    ip: IpAddr,
    active: ActiveMap,
}

impl ConnectionLimiter {
    pub fn new(max_connections_per_ip: u32) -> Self {
        Self {
            max_connections_per_ip,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Reserve a slot for `ip`, or `None` if it is already at the limit.
    pub fn try_acquire(&self, ip: IpAddr) -> Option<ConnectionPermit> {
        let mut map = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let count = map.entry(ip).or_insert(0);

        if *count >= self.max_connections_per_ip {
            warn!(%ip, count = *count, limit = self.max_connections_per_ip,
                "Rate limited: too many connections from IP");
            return None;
        }

        *count += 1;
        Some(ConnectionPermit {
            ip,
            active: self.active.clone(),
        })
    }

    /// Connections currently held by `ip`.
    pub fn active_for(&self, ip: IpAddr) -> u32 {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&ip)
            .copied()
            .unwrap_or(0)
    }
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        let mut map = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = map.get_mut(&self.ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                map.remove(&self.ip);
            }
        }
        debug!(ip = %self.ip, entries = map.len(), "Connection permit released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_limiter_allows() {
        let limiter = ConnectionLimiter::new(3);
        let ip = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1));

        let _a = limiter.try_acquire(ip).unwrap();
        let _b = limiter.try_acquire(ip).unwrap();
        let _c = limiter.try_acquire(ip).unwrap();
        assert_eq!(limiter.active_for(ip), 3);
    }

    #[test]
    fn test_limiter_blocks() {
        let limiter = ConnectionLimiter::new(2);
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

        let _a = limiter.try_acquire(ip).unwrap();
        let _b = limiter.try_acquire(ip).unwrap();
        assert!(limiter.try_acquire(ip).is_none()); // Should be blocked
    }

    #[test]
    fn test_limiter_different_ips() {
        let limiter = ConnectionLimiter::new(1);
        let ip1 = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let ip2 = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

        let _a = limiter.try_acquire(ip1).unwrap();
        let _b = limiter.try_acquire(ip2).unwrap();
        assert!(limiter.try_acquire(ip1).is_none()); // Blocked
        assert!(limiter.try_acquire(ip2).is_none()); // Blocked
    }

    #[test]
    fn test_permit_drop_releases() {
        let limiter = ConnectionLimiter::new(1);
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

        let permit = limiter.try_acquire(ip).unwrap();
        assert!(limiter.try_acquire(ip).is_none());
        drop(permit);
        assert_eq!(limiter.active_for(ip), 0);
        assert!(limiter.try_acquire(ip).is_some());
    }
}
