pub(crate) mod actor;
pub(crate) mod ticker;
pub(crate) mod timer;

/// Commands the detector sends to arm or cancel a logical timer.
#[derive(Debug)]
pub(crate) enum TimerCommand<T> {
    Arm { id: u32, timer: T },
    Cancel { id: u32 },
}
