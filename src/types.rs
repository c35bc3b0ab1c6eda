use std::time::Duration;

/// Outcome of a downstream call as seen by the admission controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Fail,
    Timeout,
}

impl Outcome {
    /// Timeout wins over failure: a call that ran past its budget is a timeout even if it also errored.
    pub fn classify(elapsed: Duration, timeout: Duration, failed: bool) -> Self {
        if elapsed > timeout {
            Self::Timeout
        }
        else if failed {
            Self::Fail
        }
        else {
            Self::Success
        }
    }
}
