use std::collections::HashMap;

use crate::schedulers::timer::ProtocolTimer;
use crate::schedulers::TimerCommand;

/// Logical timer wheel. One `advance_clock` call is one tick; the wheel
/// emits a protocol-period callback every `period_ticks` ticks and expires
/// whatever armed timers run out in between. Keeping time logical makes the
/// whole state machine deterministic under test.
#[derive(Debug)]
pub(crate) struct Ticker<T> {
    period_ticks: u32,
    elapsed: u32,
    timers: HashMap<u32, T>,
}

impl<T> Ticker<T>
where
    T: ProtocolTimer,
{
    pub(crate) fn new(period_ticks: u32) -> Self {
        Self {
            period_ticks,
            elapsed: 0,
            timers: HashMap::new(),
        }
    }

    pub(crate) fn apply(&mut self, cmd: TimerCommand<T>) {
        match cmd {
            TimerCommand::Arm { id, timer } => {
                self.timers.insert(id, timer);
            }
            TimerCommand::Cancel { id } => {
                self.timers.remove(&id);
            }
        }
    }

    pub(crate) fn advance_clock(&mut self) -> Vec<T::Callback> {
        let mut events = Vec::new();

        // Age every armed timer first, then expire the ones that ran out.
        let mut expired: Vec<u32> = Vec::new();
        for (id, timer) in self.timers.iter_mut() {
            if timer.tick() == 0 {
                expired.push(*id);
            }
        }
        for id in expired {
            if let Some(timer) = self.timers.remove(&id) {
                events.push(timer.expire(id));
            }
        }

        self.elapsed += 1;
        if self.elapsed >= self.period_ticks {
            self.elapsed = 0;
            events.push(Default::default());
        }

        events
    }

    #[cfg(test)]
    pub(crate) fn has_timer(&self, id: u32) -> bool {
        self.timers.contains_key(&id)
    }
}
