//! Primitive kinds managed by the registry.

use serde::{Deserialize, Serialize};

/// Category of native primitive a task wraps.
///
/// The kind decides how the task is started, how it is stopped and whether it
/// stays registered after it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// One-shot timer.
    Timeout,
    /// Recurring timer.
    Interval,
    /// Runs on the next scheduler turn.
    Immediate,
    /// Runs on the next frame tick.
    AnimationFrame,
    /// Runs once the host is idle.
    IdleCallback,
    /// Handle to a separate execution context, alive until terminated.
    Worker,
    /// In-flight request with an abort operation.
    Request,
    /// Listener attached to an [`EventEmitter`](crate::emitter::EventEmitter).
    EventListener,
    /// Arbitrary callback invoked through a [`Proxy`](crate::registry::Proxy).
    Proxy,
}

impl TaskKind {
    /// Every kind, in declaration order.
    pub const ALL: [TaskKind; 9] = [
        TaskKind::Timeout,
        TaskKind::Interval,
        TaskKind::Immediate,
        TaskKind::AnimationFrame,
        TaskKind::IdleCallback,
        TaskKind::Worker,
        TaskKind::Request,
        TaskKind::EventListener,
        TaskKind::Proxy,
    ];

    /// Stable lowercase name used in logs and error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Interval => "interval",
            Self::Immediate => "immediate",
            Self::AnimationFrame => "animation_frame",
            Self::IdleCallback => "idle_callback",
            Self::Worker => "worker",
            Self::Request => "request",
            Self::EventListener => "event_listener",
            Self::Proxy => "proxy",
        }
    }

    /// Whether a task of this kind stays registered after it fires.
    ///
    /// `single` is the caller's one-shot flag; only listeners and proxies
    /// honour it. Listeners are persistent unless `single` is set, proxies
    /// are one-shot unless `single` is explicitly `false`.
    pub fn is_recurring(self, single: Option<bool>) -> bool {
        match self {
            Self::Interval | Self::Worker => true,
            Self::EventListener => !single.unwrap_or(false),
            Self::Proxy => !single.unwrap_or(true),
            Self::Timeout
            | Self::Immediate
            | Self::AnimationFrame
            | Self::IdleCallback
            | Self::Request => false,
        }
    }

    /// Whether the native primitive is driven by the tokio runtime.
    pub(crate) fn needs_runtime(self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::Interval
                | Self::Immediate
                | Self::AnimationFrame
                | Self::IdleCallback
                | Self::Request
        )
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_kinds_are_not_recurring() {
        for kind in [
            TaskKind::Timeout,
            TaskKind::Immediate,
            TaskKind::AnimationFrame,
            TaskKind::IdleCallback,
            TaskKind::Request,
        ] {
            assert!(!kind.is_recurring(None), "{kind} should be one-shot");
            assert!(!kind.is_recurring(Some(false)), "{kind} ignores single");
        }
    }

    #[test]
    fn interval_and_worker_always_recur() {
        assert!(TaskKind::Interval.is_recurring(Some(true)));
        assert!(TaskKind::Worker.is_recurring(None));
    }

    #[test]
    fn listener_and_proxy_defaults_differ() {
        assert!(TaskKind::EventListener.is_recurring(None));
        assert!(!TaskKind::EventListener.is_recurring(Some(true)));
        assert!(!TaskKind::Proxy.is_recurring(None));
        assert!(TaskKind::Proxy.is_recurring(Some(false)));
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&TaskKind::AnimationFrame).unwrap();
        assert_eq!(json, "\"animation_frame\"");
        let back: TaskKind = serde_json::from_str("\"event_listener\"").unwrap();
        assert_eq!(back, TaskKind::EventListener);
    }

    #[test]
    fn display_matches_as_str() {
        for kind in TaskKind::ALL {
            assert_eq!(kind.to_string(), kind.as_str());
        }
    }
}
