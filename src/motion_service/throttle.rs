//! Per-target notification cooldown

use super::types::NotificationKind;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Last-sent tracking per (destination, channel, kind)
pub struct NotificationThrottle {
    cooldown: Duration,
    last_sent: HashMap<(String, String, NotificationKind), Instant>,
}

impl NotificationThrottle {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_sent: HashMap::new(),
        }
    }

    /// Reserve a send slot; false while the previous send is within the cooldown
    pub fn try_acquire(&mut self, destination: &str, channel: &str, kind: NotificationKind, now: Instant) -> bool {
        let key = (destination.to_string(), channel.to_string(), kind);
        if let Some(last) = self.last_sent.get(&key) {
            if now.saturating_duration_since(*last) < self.cooldown {
                return false;
            }
        }
        self.last_sent.insert(key, now);
        true
    }

    /// Drop entries older than the cooldown
    pub fn prune(&mut self, now: Instant) {
        let cooldown = self.cooldown;
        self.last_sent
            .retain(|_, last| now.saturating_duration_since(*last) < cooldown);
    }

    pub fn len(&self) -> usize {
        self.last_sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_sent.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown_per_destination_and_kind() {
        let mut throttle = NotificationThrottle::new(Duration::from_secs(60));
        let t0 = Instant::now();

        assert!(throttle.try_acquire("42", "telegram", NotificationKind::Text, t0));
        assert!(!throttle.try_acquire("42", "telegram", NotificationKind::Text, t0 + Duration::from_secs(30)));

        // other kind, channel or destination are independent
        assert!(throttle.try_acquire("42", "telegram", NotificationKind::Image, t0));
        assert!(throttle.try_acquire("42", "webhook", NotificationKind::Text, t0));
        assert!(throttle.try_acquire("43", "telegram", NotificationKind::Text, t0));

        assert!(throttle.try_acquire("42", "telegram", NotificationKind::Text, t0 + Duration::from_secs(60)));
    }

    #[test]
    fn test_persistent_motion_notifies_once_per_window() {
        let mut throttle = NotificationThrottle::new(Duration::from_secs(10));
        let t0 = Instant::now();
        let sent = (0..100)
            .filter(|i| {
                throttle.try_acquire("42", "telegram", NotificationKind::Text, t0 + Duration::from_millis(200 * i))
            })
            .count();
        // 20s of motion, one send per 10s window
        assert_eq!(sent, 2);
    }

    #[test]
    fn test_prune() {
        let mut throttle = NotificationThrottle::new(Duration::from_secs(10));
        let t0 = Instant::now();
        throttle.try_acquire("a", "telegram", NotificationKind::Text, t0);
        throttle.try_acquire("b", "telegram", NotificationKind::Text, t0 + Duration::from_secs(8));
        throttle.prune(t0 + Duration::from_secs(12));
        assert_eq!(throttle.len(), 1);
    }
}
