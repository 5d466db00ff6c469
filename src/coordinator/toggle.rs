use std::future::Future;

use crate::error::CoordError;

/// Client-side emergency switch with speculative update.
///
/// The local flag flips before the backend call resolves. On failure it is
/// restored to the pre-toggle value and the call is not retried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimisticToggle {
    active: bool,
}

impl OptimisticToggle {
    pub const fn new(active: bool) -> Self {
        Self { active }
    }

    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Flips the flag and runs `call` with the new value.
    pub async fn flip<T, F, Fut>(&mut self, call: F) -> Result<T, CoordError>
    where
        F: FnOnce(bool) -> Fut,
        Fut: Future<Output = Result<T, CoordError>>,
    {
        let previous = self.active;
        self.active = !previous;
        match call(self.active).await {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::warn!(error = %e, restored = previous, "toggle failed, reverting");
                self.active = previous;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn success_keeps_speculative_value() {
        let mut toggle = OptimisticToggle::new(false);
        let seen = toggle.flip(|on| async move { Ok(on) }).await.unwrap();
        assert!(seen);
        assert!(toggle.is_active());
    }

    #[tokio::test]
    async fn failure_restores_previous_value() {
        let mut toggle = OptimisticToggle::new(true);
        let result: Result<(), _> = toggle
            .flip(|_| async { Err(CoordError::UpstreamUnavailable("offline".into())) })
            .await;
        assert!(result.unwrap_err().is_retryable());
        assert!(toggle.is_active());
    }
}
