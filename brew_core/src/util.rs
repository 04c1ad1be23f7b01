//! Small helpers shared by the loops and the session manager.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use brew_traits::{Direction, VALVE_POSITIONS};

/// Position after moving `count` steps from `pos`, wrapping modulo one rotation.
#[inline]
pub fn wrap_position(pos: u8, direction: Direction, count: u32) -> u8 {
    let n = u32::from(VALVE_POSITIONS);
    let cur = u32::from(pos) % n;
    let delta = count % n;
    let next = match direction {
        Direction::Forward => (cur + delta) % n,
        Direction::Backward => (cur + n - delta) % n,
    };
    next as u8
}

/// Shortest move that takes the valve from `from` back to `to`.
pub fn path_to(from: u8, to: u8) -> Option<(Direction, u32)> {
    let n = u32::from(VALVE_POSITIONS);
    let fwd = (u32::from(to) + n - u32::from(from) % n) % n;
    match fwd {
        0 => None,
        d if d <= n / 2 => Some((Direction::Forward, d)),
        d => Some((Direction::Backward, n - d)),
    }
}

/// Delay before the next attempt after `failures` consecutive failures:
/// `base * 2^failures`, capped at `cap`. Zero failures gives `base`.
#[inline]
pub fn backoff_delay(base: Duration, failures: u32, cap: Duration) -> Duration {
    let factor = 1u32.checked_shl(failures.min(16)).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(cap.max(base))
}

/// Lock a mutex, carrying on with the inner value if a previous holder panicked.
#[inline]
pub(crate) fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
