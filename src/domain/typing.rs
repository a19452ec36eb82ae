//! Ephemeral typing indicators.
//!
//! Each user is either idle or typing until an expiry instant. A keystroke
//! re-arms the single expiry; a lost stop signal is tolerated because the
//! entry lapses on its own.

use std::collections::BTreeMap;

use super::ids::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypingState {
    #[default]
    Idle,
    Active {
        expires_at_ms: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingEvent {
    Keystroke,
    Stop,
    Tick,
}

impl TypingState {
    pub fn reduce(self, event: TypingEvent, now_ms: i64, ttl_ms: i64) -> Self {
        match event {
            TypingEvent::Keystroke => Self::Active {
                expires_at_ms: now_ms.saturating_add(ttl_ms),
            },
            TypingEvent::Stop => Self::Idle,
            TypingEvent::Tick => self.settle(now_ms),
        }
    }

    pub fn is_active(self, now_ms: i64) -> bool {
        matches!(self.settle(now_ms), Self::Active { .. })
    }

    fn settle(self, now_ms: i64) -> Self {
        match self {
            Self::Active { expires_at_ms } if now_ms < expires_at_ms => self,
            _ => Self::Idle,
        }
    }
}

/// Typing state of every participant in one conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypingTracker {
    users: BTreeMap<UserId, TypingState>,
}

impl TypingTracker {
    /// Applies `event` for `user` and returns whether the user went from idle
    /// to typing.
    pub fn apply(&mut self, user: &UserId, event: TypingEvent, now_ms: i64, ttl_ms: i64) -> bool {
        let previous = self.state_of(user, now_ms);
        let next = previous.reduce(event, now_ms, ttl_ms);

        match next {
            TypingState::Idle => {
                self.users.remove(user);
            }
            active => {
                self.users.insert(user.clone(), active);
            }
        }

        !previous.is_active(now_ms) && next.is_active(now_ms)
    }

    pub fn state_of(&self, user: &UserId, now_ms: i64) -> TypingState {
        self.users
            .get(user)
            .copied()
            .unwrap_or_default()
            .reduce(TypingEvent::Tick, now_ms, 0)
    }

    /// Users typing at `now_ms`, in stable order.
    pub fn active_users(&self, now_ms: i64) -> Vec<UserId> {
        self.users
            .iter()
            .filter(|(_, state)| state.is_active(now_ms))
            .map(|(user, _)| user.clone())
            .collect()
    }

    /// Drops lapsed entries.
    pub fn prune(&mut self, now_ms: i64) {
        self.users.retain(|_, state| state.is_active(now_ms));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: i64 = 5_000;

    #[test]
    fn keystroke_arms_expiry() {
        let state = TypingState::Idle.reduce(TypingEvent::Keystroke, 1_000, TTL);

        assert_eq!(state, TypingState::Active { expires_at_ms: 6_000 });
        assert!(state.is_active(5_999));
        assert!(!state.is_active(6_000));
    }

    #[test]
    fn repeated_keystrokes_re_arm_single_expiry() {
        let state = TypingState::Idle
            .reduce(TypingEvent::Keystroke, 1_000, TTL)
            .reduce(TypingEvent::Keystroke, 4_000, TTL);

        assert_eq!(state, TypingState::Active { expires_at_ms: 9_000 });
    }

    #[test]
    fn stop_returns_to_idle() {
        let state = TypingState::Active { expires_at_ms: 9_000 }.reduce(TypingEvent::Stop, 2_000, TTL);

        assert_eq!(state, TypingState::Idle);
    }

    #[test]
    fn tick_after_expiry_clears_state() {
        let state = TypingState::Active { expires_at_ms: 3_000 }.reduce(TypingEvent::Tick, 3_500, TTL);

        assert_eq!(state, TypingState::Idle);
    }

    #[test]
    fn tracker_reports_transition_only_on_start() {
        let mut tracker = TypingTracker::default();
        let alice = UserId::new("alice");

        assert!(tracker.apply(&alice, TypingEvent::Keystroke, 1_000, TTL));
        assert!(!tracker.apply(&alice, TypingEvent::Keystroke, 2_000, TTL));
        assert!(tracker.apply(&alice, TypingEvent::Keystroke, 8_000, TTL));
    }

    #[test]
    fn tracker_lists_only_active_users() {
        let mut tracker = TypingTracker::default();
        tracker.apply(&UserId::new("bob"), TypingEvent::Keystroke, 1_000, TTL);
        tracker.apply(&UserId::new("alice"), TypingEvent::Keystroke, 4_000, TTL);

        assert_eq!(
            tracker.active_users(6_500),
            vec![UserId::new("alice")]
        );

        tracker.prune(6_500);
        assert_eq!(tracker.state_of(&UserId::new("bob"), 6_500), TypingState::Idle);
    }
}
