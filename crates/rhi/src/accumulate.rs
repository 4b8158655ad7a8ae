//! Attempt every call of a batch, report failures once at the end.

use anyhow::Result;

/// Collects the outcome of a sequence of fallible GPU calls.
///
/// ```rust,ignore
/// let mut acc = ErrorAccumulator::new();
/// acc.track(cmd.bind_compute_state(&state));
/// acc.track(cmd.bind_constant_set(&set));
/// acc.track(cmd.dispatch(x, y, 1));
/// acc.finish()?;
/// ```
#[derive(Debug, Default)]
pub struct ErrorAccumulator {
    first: Option<anyhow::Error>,
    failures: usize,
}

impl ErrorAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `result`, returning its value on success.
    pub fn track<T, E>(&mut self, result: std::result::Result<T, E>) -> Option<T>
    where
        E: Into<anyhow::Error>,
    {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.failures += 1;
                if self.first.is_none() {
                    self.first = Some(e.into());
                }
                None
            }
        }
    }

    pub fn is_ok(&self) -> bool {
        self.failures == 0
    }

    pub fn failure_count(&self) -> usize {
        self.failures
    }

    /// First recorded error, annotated with how many others followed.
    pub fn finish(self) -> Result<()> {
        match self.first {
            None => Ok(()),
            Some(e) if self.failures == 1 => Err(e),
            Some(e) => Err(e.context(format!("{} GPU calls failed", self.failures))),
        }
    }
}
