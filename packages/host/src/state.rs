use std::fmt;

use crate::error::LifecycleError;

/// Lifecycle state of one hosted service instance.
///
/// ```text
/// Created -> Initialized -> Running -> ShuttingDown -> Terminated
/// ```
///
/// `Initialized -> ShuttingDown` covers rollback of a group that failed to
/// start; `Created -> Terminated` discards an instance whose init failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Created,
    Initialized,
    Running,
    ShuttingDown,
    Terminated,
}

impl ServiceState {
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Initialized | Self::Terminated)
                | (Self::Initialized, Self::Running | Self::ShuttingDown)
                | (Self::Running, Self::ShuttingDown)
                | (Self::ShuttingDown, Self::Terminated)
        )
    }

    /// Validates and returns the next state.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidTransition`] if `next` is not reachable
    /// from `self`.
    pub fn transition(self, service: &str, next: Self) -> Result<Self, LifecycleError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(LifecycleError::InvalidTransition {
                service: service.to_string(),
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::ShuttingDown => "shutting-down",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_path_is_valid() {
        let mut state = ServiceState::Created;
        for next in [
            ServiceState::Initialized,
            ServiceState::Running,
            ServiceState::ShuttingDown,
            ServiceState::Terminated,
        ] {
            state = state.transition("svc", next).unwrap();
        }
        assert_eq!(state, ServiceState::Terminated);
    }

    #[test]
    fn rollback_and_discard_paths_are_valid() {
        assert!(ServiceState::Initialized.can_transition_to(ServiceState::ShuttingDown));
        assert!(ServiceState::Created.can_transition_to(ServiceState::Terminated));
    }

    #[test]
    fn terminated_is_final() {
        let err = ServiceState::Terminated
            .transition("svc", ServiceState::ShuttingDown)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid state transition for service svc: terminated -> shutting-down"
        );
    }

    #[test]
    fn process_before_init_is_rejected() {
        assert!(!ServiceState::Created.can_transition_to(ServiceState::Running));
        assert!(!ServiceState::Running.can_transition_to(ServiceState::Initialized));
    }
}
