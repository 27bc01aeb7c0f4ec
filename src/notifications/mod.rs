//! Operator alert channel. Best-effort and fire-and-forget: a failed or
//! full channel never fails a cycle. Replaces the original's
//! background-thread-with-its-own-event-loop bot with a plain
//! `tokio::sync::mpsc` channel consumed by a single worker task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Pair-trading alert vocabulary: entry/exit/rollback-failure/
/// settlement-mismatch/emergency-stop events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AlertType {
    PositionOpened {
        pair_id: i64,
        pair_name: String,
        direction: i32,
        notional: f64,
    },
    PositionClosed {
        pair_id: i64,
        pair_name: String,
        pnl: f64,
        pnl_pct: f64,
        reason: String,
    },
    RollbackFailed {
        pair_id: i64,
        stage: String,
        message: String,
    },
    SettlementMismatch {
        pair_id: i64,
        stage: String,
    },
    CycleError {
        pair_id: i64,
        message: String,
    },
    EmergencyStop {
        positions_closed: usize,
        pairs_disabled: usize,
        error_count: usize,
    },
}

impl AlertType {
    pub fn default_severity(&self) -> Severity {
        match self {
            AlertType::RollbackFailed { .. } => Severity::Critical,
            AlertType::CycleError { .. } => Severity::Warning,
            AlertType::SettlementMismatch { .. } => Severity::Warning,
            AlertType::EmergencyStop { error_count, .. } if *error_count > 0 => Severity::Warning,
            _ => Severity::Info,
        }
    }

    pub fn title(&self) -> String {
        match self {
            AlertType::PositionOpened { pair_name, .. } => format!("Position opened: {pair_name}"),
            AlertType::PositionClosed { pair_name, reason, .. } => format!("Position closed: {pair_name} ({reason})"),
            AlertType::RollbackFailed { stage, .. } => format!("Rollback failed at {stage}"),
            AlertType::SettlementMismatch { stage, .. } => format!("Settlement mismatch at {stage}"),
            AlertType::CycleError { pair_id, .. } => format!("Cycle error for pair {pair_id}"),
            AlertType::EmergencyStop { positions_closed, pairs_disabled, .. } => {
                format!("Emergency stop: {positions_closed} closed, {pairs_disabled} disabled")
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub alert_type: AlertType,
}

impl Notification {
    pub fn new(alert_type: AlertType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            severity: alert_type.default_severity(),
            alert_type,
        }
    }
}

/// Non-blocking sender half. `notify` is a `try_send` — a saturated or
/// closed channel is swallowed, never propagated to the caller.
#[derive(Clone)]
pub struct NotificationManager {
    tx: mpsc::Sender<Notification>,
}

impl NotificationManager {
    /// Spawns the single worker task that drains the channel and logs each
    /// alert at its severity level. Returns the manager handle; dropping
    /// all handles lets the worker exit.
    pub fn spawn(buffer: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Notification>(buffer);

        tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                let title = notification.alert_type.title();
                match notification.severity {
                    Severity::Critical => error!(id = %notification.id, "{title}"),
                    Severity::Warning => warn!(id = %notification.id, "{title}"),
                    Severity::Info => info!(id = %notification.id, "{title}"),
                }
            }
        });

        Self { tx }
    }

    pub fn notify(&self, alert_type: AlertType) {
        let notification = Notification::new(alert_type);
        if self.tx.try_send(notification).is_err() {
            warn!("notification channel full or closed, dropping alert");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_failed_defaults_to_critical() {
        let alert = AlertType::RollbackFailed {
            pair_id: 1,
            stage: "entry".to_string(),
            message: "cancel failed".to_string(),
        };
        assert_eq!(alert.default_severity(), Severity::Critical);
    }

    #[test]
    fn position_opened_defaults_to_info() {
        let alert = AlertType::PositionOpened {
            pair_id: 1,
            pair_name: "btc_eth".to_string(),
            direction: 1,
            notional: 1000.0,
        };
        assert_eq!(alert.default_severity(), Severity::Info);
    }

    #[tokio::test]
    async fn notify_does_not_block_on_a_live_worker() {
        let manager = NotificationManager::spawn(16);
        manager.notify(AlertType::CycleError {
            pair_id: 1,
            message: "boom".to_string(),
        });
        tokio::task::yield_now().await;
    }
}
