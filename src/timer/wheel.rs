//! Binary min-heap of per-connection deadlines

use std::collections::HashMap;
use std::time::{Duration, Instant};

use mio::Token;

struct Entry {
    token: Token,
    expire_at: Instant,
}

/// One per worker loop. Tracks an idle-timeout deadline per connection token and reaps
/// expired ones.
///
/// Invariant: for every `fd` in the index map, `heap[index_map[fd]].token == fd`,
/// and the heap root holds the minimum `expire_at`.
#[derive(Default)]
pub struct TimerWheel {
    heap: Vec<Entry>,
    index: HashMap<Token, usize>,
}

impl TimerWheel {
    /// Creates an empty wheel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live timers.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether there are no live timers.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Adds a timer for `token` expiring `timeout` from `now`. If `token` already has a
    /// timer, this upgrades to [`TimerWheel::adjust`]
    pub fn add(&mut self, token: Token, now: Instant, timeout: Duration) {
        if self.index.contains_key(&token) {
            self.adjust(token, now, timeout);
            return;
        }

        let idx = self.heap.len();
        self.heap.push(Entry {
            token,
            expire_at: now + timeout,
        });
        self.index.insert(token, idx);
        self.sift_up(idx);
    }

    /// Resets `token`'s deadline to `timeout` from `now`. A no-op if `token` has no timer.
    pub fn adjust(&mut self, token: Token, now: Instant, timeout: Duration) {
        let Some(&idx) = self.index.get(&token) else {
            return;
        };
        self.heap[idx].expire_at = now + timeout;
        self.sift_down(idx);
        self.sift_up(idx);
    }

    /// Removes `token`'s timer, if any.
    pub fn remove(&mut self, token: Token) {
        let Some(idx) = self.index.remove(&token) else {
            return;
        };

        let last = self.heap.len() - 1;
        self.heap.swap(idx, last);
        self.heap.pop();

        if idx < self.heap.len() {
            self.index.insert(self.heap[idx].token, idx);
            self.sift_down(idx);
            self.sift_up(idx);
        }
    }

    /// Pops every timer whose deadline has passed and returns their tokens, so the caller
    /// can invoke close callbacks outside the heap's internal mutation
    pub fn handle_expired(&mut self, now: Instant) -> Vec<Token> {
        let mut expired = Vec::new();
        while let Some(front) = self.heap.first() {
            if front.expire_at > now {
                break;
            }
            let token = front.token;
            self.remove(token);
            expired.push(token);
        }
        expired
    }

    /// Milliseconds until the next deadline: `0` if already expired, `-1` if no timers are
    /// pending (wait forever)
    pub fn next_timeout_ms(&self, now: Instant) -> i64 {
        match self.heap.first() {
            None => -1,
            Some(front) if front.expire_at <= now => 0,
            Some(front) => (front.expire_at - now).as_millis() as i64,
        }
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if self.heap[parent].expire_at <= self.heap[idx].expire_at {
                break;
            }
            self.swap(parent, idx);
            idx = parent;
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        loop {
            let left = 2 * idx + 1;
            let right = 2 * idx + 2;
            let mut smallest = idx;

            if left < self.heap.len() && self.heap[left].expire_at < self.heap[smallest].expire_at
            {
                smallest = left;
            }
            if right < self.heap.len()
                && self.heap[right].expire_at < self.heap[smallest].expire_at
            {
                smallest = right;
            }
            if smallest == idx {
                break;
            }
            self.swap(smallest, idx);
            idx = smallest;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.index.insert(self.heap[a].token, a);
        self.index.insert(self.heap[b].token, b);
    }

    #[cfg(test)]
    fn check_invariant(&self) {
        for (token, &idx) in &self.index {
            assert_eq!(self.heap[idx].token, *token);
        }
        for (i, entry) in self.heap.iter().enumerate() {
            let left = 2 * i + 1;
            let right = 2 * i + 2;
            if left < self.heap.len() {
                assert!(entry.expire_at <= self.heap[left].expire_at);
            }
            if right < self.heap.len() {
                assert!(entry.expire_at <= self.heap[right].expire_at);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_minimum_after_inserts() {
        let mut wheel = TimerWheel::new();
        let now = Instant::now();
        wheel.add(Token(1), now, Duration::from_millis(500));
        wheel.add(Token(2), now, Duration::from_millis(100));
        wheel.add(Token(3), now, Duration::from_millis(900));
        wheel.check_invariant();
        assert_eq!(wheel.heap[0].token, Token(2));
    }

    #[test]
    fn add_remove_restores_prior_next_timeout() {
        let mut wheel = TimerWheel::new();
        let now = Instant::now();
        wheel.add(Token(1), now, Duration::from_millis(500));
        let before = wheel.next_timeout_ms(now);

        wheel.add(Token(2), now, Duration::from_millis(10));
        wheel.remove(Token(2));
        wheel.check_invariant();

        let after = wheel.next_timeout_ms(now);
        assert_eq!(before, after);
    }

    #[test]
    fn add_existing_token_upgrades_to_adjust() {
        let mut wheel = TimerWheel::new();
        let now = Instant::now();
        wheel.add(Token(1), now, Duration::from_millis(1000));
        wheel.add(Token(1), now, Duration::from_millis(10));
        assert_eq!(wheel.len(), 1);
        assert_eq!(wheel.next_timeout_ms(now), 10);
    }

    #[test]
    fn handle_expired_pops_only_due_timers() {
        let mut wheel = TimerWheel::new();
        let now = Instant::now();
        wheel.add(Token(1), now, Duration::from_millis(0));
        wheel.add(Token(2), now, Duration::from_millis(10_000));
        wheel.check_invariant();

        let expired = wheel.handle_expired(now);
        assert_eq!(expired, vec![Token(1)]);
        assert_eq!(wheel.len(), 1);
        wheel.check_invariant();
    }

    #[test]
    fn next_timeout_reports_wait_forever_when_empty() {
        let wheel = TimerWheel::new();
        assert_eq!(wheel.next_timeout_ms(Instant::now()), -1);
    }
}
