//! Countdown timer abstractions used by the transfer state machines.
use core::fmt::Debug;
use core::time::Duration;

/// Generic abstraction for a check/countdown timer. Should also be cheap to copy and clone.
pub trait CountdownProvider: Debug {
    fn has_expired(&self) -> bool;
    fn reset(&mut self);
}

/// The purpose a countdown is created for.
///
/// This allows the creation of different check timers depending on context, for example a
/// standard clock timer on a host versus a timer driven by an RTC on an embedded target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TimerContext {
    /// Expiry period without any inbound PDU after which an inactivity fault is declared.
    Inactivity { expiry_time: Duration },
    /// Expiry period for re-issuing a NAK sequence while lost segments are outstanding.
    NakActivity { expiry_time: Duration },
    /// Expiry period for re-sending an EOF PDU which was not acknowledged yet.
    PositiveAck { expiry_time: Duration },
}

impl TimerContext {
    pub fn expiry_time(&self) -> Duration {
        match self {
            TimerContext::Inactivity { expiry_time } => *expiry_time,
            TimerContext::NakActivity { expiry_time } => *expiry_time,
            TimerContext::PositiveAck { expiry_time } => *expiry_time,
        }
    }
}

/// Creation trait for the countdown timers used by the CFDP handlers.
pub trait TimerCreatorProvider {
    type Countdown: CountdownProvider;

    fn create_countdown(&self, timer_context: TimerContext) -> Self::Countdown;
}

#[cfg(feature = "std")]
pub use std_mod::*;

#[cfg(feature = "std")]
pub mod std_mod {
    use super::*;

    /// Simple implementation of the [CountdownProvider] trait assuming a standard runtime.
    #[derive(Debug)]
    pub struct StdCountdown {
        expiry_time: Duration,
        start_time: std::time::Instant,
    }

    impl StdCountdown {
        pub fn new(expiry_time: Duration) -> Self {
            Self {
                expiry_time,
                start_time: std::time::Instant::now(),
            }
        }

        pub fn expiry_time_seconds(&self) -> u64 {
            self.expiry_time.as_secs()
        }
    }

    impl CountdownProvider for StdCountdown {
        fn has_expired(&self) -> bool {
            self.start_time.elapsed() > self.expiry_time
        }

        fn reset(&mut self) {
            self.start_time = std::time::Instant::now();
        }
    }

    /// Creates [StdCountdown] timers with the expiry time of the passed [TimerContext].
    #[derive(Debug, Default)]
    pub struct StdTimerCreator {}

    impl TimerCreatorProvider for StdTimerCreator {
        type Countdown = StdCountdown;

        fn create_countdown(&self, timer_context: TimerContext) -> Self::Countdown {
            StdCountdown::new(timer_context.expiry_time())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_std_countdown() {
        let mut countdown = StdCountdown::new(Duration::from_millis(100));
        assert!(!countdown.has_expired());
        assert_eq!(countdown.expiry_time_seconds(), 0);
        std::thread::sleep(Duration::from_millis(150));
        assert!(countdown.has_expired());
        countdown.reset();
        assert!(!countdown.has_expired());
    }

    #[test]
    fn test_std_timer_creator() {
        let creator = StdTimerCreator::default();
        let countdown = creator.create_countdown(TimerContext::NakActivity {
            expiry_time: Duration::from_secs(5),
        });
        assert_eq!(countdown.expiry_time_seconds(), 5);
        assert!(!countdown.has_expired());
    }

    #[test]
    fn test_timer_context_expiry() {
        assert_eq!(
            TimerContext::Inactivity {
                expiry_time: Duration::from_secs(2)
            }
            .expiry_time(),
            Duration::from_secs(2)
        );
    }
}
