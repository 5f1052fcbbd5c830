//! Response specs
//!
//! A [`ResponseSpec`] tells the engine when the reply to a command is complete.
//! Evaluation is a pure function of the bytes received so far and the time
//! elapsed since the command was written, so it can be driven by synthetic
//! input without a serial link.

use std::time::Duration;

/// Rule deciding when a response is complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSpec {
    /// Complete once `n` bytes have arrived; the response is the first `n`.
    FixedLength(usize),
    /// Complete once the window elapses; the response is whatever arrived,
    /// possibly nothing. The window starts when the command is written.
    TimeBounded(Duration),
}

/// Outcome of evaluating a spec against the accumulator
#[derive(Debug, PartialEq, Eq)]
pub enum Evaluation<'a> {
    /// More bytes or more time needed
    Incomplete,
    /// The response is ready
    Complete {
        /// Bytes forming the response
        response: &'a [u8],
        /// Bytes past the end of the response
        surplus: &'a [u8],
    },
}

impl ResponseSpec {
    /// Time-bounded spec with the window given in milliseconds
    pub fn time_bounded_ms(ms: u64) -> Self {
        ResponseSpec::TimeBounded(Duration::from_millis(ms))
    }

    /// Capture window, if this spec completes on a timer
    pub fn window(&self) -> Option<Duration> {
        match self {
            ResponseSpec::FixedLength(_) => None,
            ResponseSpec::TimeBounded(window) => Some(*window),
        }
    }

    /// Number of bytes expected, for length-delimited specs
    pub fn expected_len(&self) -> Option<usize> {
        match self {
            ResponseSpec::FixedLength(n) => Some(*n),
            ResponseSpec::TimeBounded(_) => None,
        }
    }

    /// Check whether `received` satisfies this spec after `elapsed`
    pub fn evaluate<'a>(&self, received: &'a [u8], elapsed: Duration) -> Evaluation<'a> {
        match *self {
            ResponseSpec::FixedLength(n) if received.len() >= n => {
                let (response, surplus) = received.split_at(n);
                Evaluation::Complete { response, surplus }
            }
            ResponseSpec::FixedLength(_) => Evaluation::Incomplete,
            ResponseSpec::TimeBounded(window) if elapsed >= window => Evaluation::Complete {
                response: received,
                surplus: &[],
            },
            ResponseSpec::TimeBounded(_) => Evaluation::Incomplete,
        }
    }
}
