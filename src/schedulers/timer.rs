use std::fmt::Debug;

/// A countdown measured in logical ticks, owned by the [`Ticker`] wheel.
///
/// [`Ticker`]: crate::schedulers::ticker::Ticker
pub(crate) trait ProtocolTimer: Debug + Send + 'static {
    /// Produced when the countdown hits zero. `Default` is the periodic
    /// protocol tick the wheel emits on its own.
    type Callback: Default;

    /// Burn one tick; returns the ticks remaining.
    fn tick(&mut self) -> u32;

    /// Consume the expired timer into its callback.
    fn expire(self, id: u32) -> Self::Callback;
}
