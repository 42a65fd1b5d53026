//! The tracked operation entity and its state machine.
//!
//! An [`Operation`] is the full persisted record, including the auth
//! token. [`OperationSnapshot`] is the projection handed to callers and
//! watchers; it never carries the token.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vigil_core::{Error, OperationId, Result};

/// Default TTL applied when a registration does not specify one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Default grace period applied when a registration does not specify one.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5 * 60);

/// The state of a tracked operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    /// No state requested; normalised to [`OperationState::Pending`]
    /// at registration.
    #[default]
    Unspecified,

    /// Registered but not currently executing. Not subject to sweeping.
    Pending,

    /// Actively executing; must ping within TTL + grace or be swept.
    Running,

    /// Finished with a success or error result. Terminal.
    Complete,

    /// Sweeper expired the operation after missed pings. Terminal.
    Lost,
}

impl OperationState {
    /// Returns true if no further transitions are accepted from this state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Lost)
    }

    /// Normalises an unspecified initial state to pending.
    #[must_use]
    pub const fn or_pending(self) -> Self {
        match self {
            Self::Unspecified => Self::Pending,
            other => other,
        }
    }

    /// Returns the snake_case wire name of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unspecified => "unspecified",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Lost => "lost",
        }
    }
}

impl std::fmt::Display for OperationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "unspecified" => Ok(Self::Unspecified),
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "complete" => Ok(Self::Complete),
            "lost" => Ok(Self::Lost),
            other => Err(Error::invalid_argument(format!(
                "unknown operation state '{other}'"
            ))),
        }
    }
}

/// The success variant of a completed operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessOutcome {
    /// Free-text completion message.
    #[serde(default)]
    pub message: String,
    /// Optional caller-defined result payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

/// The error variant of a completed operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorOutcome {
    /// Free-text error message.
    #[serde(default)]
    pub message: String,
    /// Optional caller-defined error details (`errorDetails` on the
    /// wire).
    #[serde(
        rename = "errorDetails",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub details: Option<serde_json::Value>,
}

/// The kind-specific result recorded when an operation completes.
///
/// At most one variant exists per operation; the enum makes the
/// "both populated" consistency error unrepresentable in the domain.
/// The persistence layer still guards against records that carry both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationOutcome {
    /// The operation finished successfully.
    Success(SuccessOutcome),
    /// The operation finished with an error.
    Error(ErrorOutcome),
}

/// A tracked unit of work with a finite lifecycle.
///
/// This is the full record as persisted, auth token included. Never
/// hand an `Operation` to a caller; project it with
/// [`Operation::snapshot`] first.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    /// Unique identifier, assigned at registration.
    pub id: OperationId,
    /// When the operation was registered.
    pub create_time: DateTime<Utc>,
    /// Rewritten on every state-changing transition.
    pub last_update: DateTime<Utc>,
    /// Caller-supplied owner identity.
    pub owner: String,
    /// Caller-supplied creator identity.
    pub creator: String,
    /// Current lifecycle state.
    pub state: OperationState,
    /// Max allowed gap between pings.
    pub ttl: Duration,
    /// Additional slack before the sweeper declares the operation lost.
    pub grace_period: Duration,
    /// Free-text description.
    pub description: String,
    /// Opaque caller-defined category.
    pub kind: String,
    /// Caller-defined parameters; immutable after creation.
    pub parameters: HashMap<String, serde_json::Value>,
    /// Caller-defined annotations; replaceable via update.
    pub annotations: HashMap<String, String>,
    /// Result variant, set only on COMPLETE.
    pub outcome: Option<OperationOutcome>,
    /// Proof of ownership, handed out exactly once at registration.
    pub auth_token: String,
    /// Advisory progress, 0..=100.
    pub percent_done: i32,
    /// Advisory status text.
    pub status_message: String,
}

impl Operation {
    /// Verifies that a mutation is allowed: the token must match and
    /// the operation must not be terminal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAuthToken`] on a token mismatch and
    /// [`Error::OperationCompleted`] when the operation is terminal.
    /// The token is checked first so a terminal record never confirms
    /// token validity.
    pub fn ensure_updatable(&self, auth_token: &str) -> Result<()> {
        if self.auth_token != auth_token {
            return Err(Error::InvalidAuthToken);
        }

        if self.state.is_terminal() {
            return Err(Error::OperationCompleted {
                id: self.id.to_hex(),
            });
        }

        Ok(())
    }

    /// Returns true if the operation is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Projects the record to its caller-visible form.
    ///
    /// The auth token is deliberately absent from the projection.
    #[must_use]
    pub fn snapshot(&self) -> OperationSnapshot {
        OperationSnapshot {
            id: self.id,
            create_time: self.create_time,
            last_update: self.last_update,
            owner: self.owner.clone(),
            creator: self.creator.clone(),
            state: self.state,
            ttl: self.ttl,
            grace_period: self.grace_period,
            description: self.description.clone(),
            kind: self.kind.clone(),
            parameters: self.parameters.clone(),
            annotations: self.annotations.clone(),
            outcome: self.outcome.clone(),
            percent_done: self.percent_done,
            status_message: self.status_message.clone(),
        }
    }
}

/// Caller-visible projection of an [`Operation`].
///
/// Returned from every read and mutation API and delivered to
/// watchers. Never carries the auth token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSnapshot {
    /// Unique identifier.
    pub id: OperationId,
    /// When the operation was registered.
    pub create_time: DateTime<Utc>,
    /// When the operation last transitioned or pinged.
    pub last_update: DateTime<Utc>,
    /// Caller-supplied owner identity.
    pub owner: String,
    /// Caller-supplied creator identity.
    pub creator: String,
    /// Current lifecycle state.
    pub state: OperationState,
    /// Max allowed gap between pings, in milliseconds on the wire.
    #[serde(with = "duration_millis")]
    pub ttl: Duration,
    /// Grace period, in milliseconds on the wire.
    #[serde(with = "duration_millis")]
    pub grace_period: Duration,
    /// Free-text description.
    pub description: String,
    /// Opaque caller-defined category.
    pub kind: String,
    /// Caller-defined parameters.
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    /// Caller-defined annotations.
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    /// Result variant, present only on COMPLETE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<OperationOutcome>,
    /// Advisory progress, 0..=100.
    pub percent_done: i32,
    /// Advisory status text.
    pub status_message: String,
}

impl OperationSnapshot {
    /// Returns true if the snapshot shows a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Serde helper: durations as integer milliseconds on the wire.
pub mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializes a duration as whole milliseconds.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(
        value: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    /// Deserializes whole milliseconds into a duration.
    ///
    /// # Errors
    ///
    /// Propagates deserializer errors.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_operation(state: OperationState) -> Operation {
        let now = Utc::now();
        Operation {
            id: OperationId::generate(),
            create_time: now,
            last_update: now,
            owner: "svc-a".into(),
            creator: "job-7".into(),
            state,
            ttl: Duration::from_secs(60),
            grace_period: Duration::from_secs(1),
            description: "d".into(),
            kind: "k".into(),
            parameters: HashMap::from([("p".to_string(), serde_json::json!("v"))]),
            annotations: HashMap::from([("a".to_string(), "b".to_string())]),
            outcome: None,
            auth_token: "token".into(),
            percent_done: 0,
            status_message: String::new(),
        }
    }

    #[test]
    fn unspecified_normalises_to_pending() {
        assert_eq!(OperationState::Unspecified.or_pending(), OperationState::Pending);
        assert_eq!(OperationState::Running.or_pending(), OperationState::Running);
    }

    #[test]
    fn terminal_states() {
        assert!(OperationState::Complete.is_terminal());
        assert!(OperationState::Lost.is_terminal());
        assert!(!OperationState::Pending.is_terminal());
        assert!(!OperationState::Running.is_terminal());
    }

    #[test]
    fn state_string_roundtrip() {
        for state in [
            OperationState::Unspecified,
            OperationState::Pending,
            OperationState::Running,
            OperationState::Complete,
            OperationState::Lost,
        ] {
            let parsed: OperationState = state.as_str().parse().unwrap();
            assert_eq!(state, parsed);
        }
        assert!("done".parse::<OperationState>().is_err());
    }

    #[test]
    fn ensure_updatable_checks_token_before_state() {
        let op = sample_operation(OperationState::Complete);

        // Wrong token on a terminal record: the token error wins.
        let err = op.ensure_updatable("wrong").unwrap_err();
        assert!(matches!(err, Error::InvalidAuthToken));

        let err = op.ensure_updatable("token").unwrap_err();
        assert!(matches!(err, Error::OperationCompleted { .. }));
    }

    #[test]
    fn ensure_updatable_allows_running_with_token() {
        let op = sample_operation(OperationState::Running);
        op.ensure_updatable("token").unwrap();
    }

    #[test]
    fn snapshot_omits_auth_token() {
        let op = sample_operation(OperationState::Running);
        let snapshot = op.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(!json.contains("token"));
        assert!(!json.contains("authToken"));
    }

    #[test]
    fn snapshot_serializes_durations_as_millis() {
        let op = sample_operation(OperationState::Running);
        let json = serde_json::to_value(op.snapshot()).unwrap();
        assert_eq!(json["ttl"], serde_json::json!(60_000));
        assert_eq!(json["gracePeriod"], serde_json::json!(1_000));
    }

    #[test]
    fn error_outcome_details_wire_name() {
        let outcome = OperationOutcome::Error(ErrorOutcome {
            message: "boom".into(),
            details: Some(serde_json::json!({"code": 7})),
        });

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["error"]["errorDetails"]["code"], serde_json::json!(7));
        assert!(json["error"].get("details").is_none());

        let back: OperationOutcome = serde_json::from_value(json).unwrap();
        assert_eq!(outcome, back);
    }

    #[test]
    fn snapshot_json_roundtrip() {
        let mut op = sample_operation(OperationState::Complete);
        op.outcome = Some(OperationOutcome::Success(SuccessOutcome {
            message: "ok".into(),
            result: Some(serde_json::json!({"rows": 3})),
        }));

        let snapshot = op.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: OperationSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot, back);
    }
}
