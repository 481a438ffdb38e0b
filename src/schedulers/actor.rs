use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time;

use crate::schedulers::ticker::Ticker;
use crate::schedulers::timer::ProtocolTimer;
use crate::schedulers::TimerCommand;

/// Drive the logical timer wheel with real time: one interval tick advances
/// the wheel by one logical tick, and whatever expires is forwarded to the
/// detector's mailbox. Exits when either side of the channel pair closes,
/// which is how shutdown reaches this task.
pub(crate) async fn run_scheduling_actor<T>(
    tick_period: Duration,
    period_ticks: u32,
    sender: mpsc::Sender<impl From<T::Callback> + Send>,
    mut mailbox: mpsc::Receiver<TimerCommand<T>>,
) where
    T: ProtocolTimer,
{
    let mut interval = time::interval(tick_period);
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    let mut ticker = Ticker::<T>::new(period_ticks);

    loop {
        tokio::select! {
            biased;
            _ = interval.tick() => {
                for event in ticker.advance_clock() {
                    if sender.send(event.into()).await.is_err() {
                        return;
                    }
                }
            }

            cmd = mailbox.recv() => {
                match cmd {
                    Some(cmd) => ticker.apply(cmd),
                    None => return,
                }
            }
        }
    }
}
