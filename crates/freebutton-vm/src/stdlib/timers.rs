//! `setTimeout` / `clearTimeout`

use super::arg;
use crate::error::{VmError, VmResult};
use crate::runtime::Runtime;
use crate::value::Value;

/// Timers that may be pending at once
pub const MAX_TIMERS: usize = 16;

/// Longest delay reported by a poll
const MAX_POLL_DELAY: i64 = 1000;

struct Timer {
    callback: Value,
    deadline: i64,
}

/// Fixed table of timer slots; a timer id is its slot index
pub(crate) struct TimerList {
    slots: Vec<Option<Timer>>,
}

/// Outcome of [`TimerList::poll`]
pub(crate) enum TimerPoll {
    /// This timer expired and was removed; call it
    Expired(Value),
    /// Nothing due for this many milliseconds
    Wait(i64),
    /// No timer pending
    Idle,
}

impl TimerList {
    pub(crate) fn new() -> Self {
        Self {
            slots: (0..MAX_TIMERS).map(|_| None).collect(),
        }
    }

    fn add(&mut self, callback: Value, deadline: i64) -> Option<usize> {
        let (id, slot) = self.slots.iter_mut().enumerate().find(|(_, s)| s.is_none())?;
        *slot = Some(Timer { callback, deadline });
        Some(id)
    }

    fn clear(&mut self, id: i32) {
        if let Some(slot) = usize::try_from(id).ok().and_then(|i| self.slots.get_mut(i)) {
            *slot = None;
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Remove and return the first expired timer in slot order.
    ///
    /// The slot is freed before the callback runs so it can schedule itself again.
    pub(crate) fn poll(&mut self, now: i64) -> TimerPoll {
        let mut min_delay = MAX_POLL_DELAY;
        let mut pending = false;
        for slot in &mut self.slots {
            let Some(timer) = slot else { continue };
            pending = true;
            let delay = timer.deadline.saturating_sub(now);
            if delay <= 0 {
                if let Some(timer) = slot.take() {
                    return TimerPoll::Expired(timer.callback);
                }
            } else if delay < min_delay {
                min_delay = delay;
            }
        }
        if pending { TimerPoll::Wait(min_delay) } else { TimerPoll::Idle }
    }
}

pub(super) fn install(runtime: &mut Runtime) {
    runtime.register_native("setTimeout", set_timeout);
    runtime.register_native("clearTimeout", clear_timeout);
}

fn set_timeout(runtime: &mut Runtime, args: &[Value]) -> VmResult<Value> {
    let callback = arg(args, 0);
    if !callback.is_callable() {
        return Err(VmError::type_error("not a function"));
    }
    let delay = arg(args, 1).to_int32();
    let deadline = runtime.clock().now_ms().saturating_add(i64::from(delay));
    let id = runtime
        .timers
        .add(callback, deadline)
        .ok_or_else(|| VmError::internal("too many timers"))?;
    tracing::trace!(id, delay, "timer scheduled");
    Ok(Value::int32(id as i32))
}

fn clear_timeout(runtime: &mut Runtime, args: &[Value]) -> VmResult<Value> {
    runtime.timers.clear(arg(args, 0).to_int32());
    Ok(Value::Undefined)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Value {
        Value::native("noop", |_, _| Ok(Value::Undefined))
    }

    #[test]
    fn test_slots_are_reused() {
        let mut timers = TimerList::new();
        assert_eq!(timers.add(noop(), 10), Some(0));
        assert_eq!(timers.add(noop(), 10), Some(1));
        timers.clear(0);
        assert_eq!(timers.add(noop(), 10), Some(0));
        timers.clear(-1);
        timers.clear(99);
        assert_eq!(timers.pending(), 2);
    }

    #[test]
    fn test_capacity() {
        let mut timers = TimerList::new();
        for _ in 0..MAX_TIMERS {
            assert!(timers.add(noop(), 0).is_some());
        }
        assert_eq!(timers.add(noop(), 0), None);
    }

    #[test]
    fn test_poll() {
        let mut timers = TimerList::new();
        assert!(matches!(timers.poll(0), TimerPoll::Idle));

        timers.add(noop(), 5000);
        assert!(matches!(timers.poll(0), TimerPoll::Wait(1000)));

        timers.add(noop(), 300);
        assert!(matches!(timers.poll(0), TimerPoll::Wait(300)));
        assert!(matches!(timers.poll(300), TimerPoll::Expired(_)));
        assert_eq!(timers.pending(), 1);
    }
}
