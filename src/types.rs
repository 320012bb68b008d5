use std::borrow::Borrow;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use url::Url;
use super::errors::Result;

/// Caller-chosen job identifier, usually derived from the local identity of
/// the selected image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for JobId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Upload job state
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    /// Created, transport not invoked yet
    Idle,
    /// Transport call in flight. `progress` stays below 1.0
    Uploading { progress: f64 },
    /// Remote location returned by the transport
    Uploaded { url: Url },
    /// Last attempt failed; the job can be retried
    Failed { message: String },
}

impl JobState {
    pub fn is_uploading(&self) -> bool {
        matches!(self, JobState::Uploading { .. })
    }

    pub fn is_uploaded(&self) -> bool {
        matches!(self, JobState::Uploaded { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, JobState::Failed { .. })
    }

    pub fn progress(&self) -> Option<f64> {
        match self {
            JobState::Uploading { progress } => Some(*progress),
            _ => None,
        }
    }

    pub fn url(&self) -> Option<&Url> {
        match self {
            JobState::Uploaded { url } => Some(url),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::Uploading { .. } => "uploading",
            JobState::Uploaded { .. } => "uploaded",
            JobState::Failed { .. } => "failed",
        }
    }

    /// Whether the job may move from `from` to `to`.
    ///
    /// Progress updates are only valid when they move forward and stay
    /// below 1.0. `Uploaded` has no way out.
    pub fn is_valid_transition(from: &JobState, to: &JobState) -> bool {
        match (from, to) {
            (JobState::Idle, JobState::Uploading { progress }) => *progress == 0.0,
            (JobState::Uploading { progress: old }, JobState::Uploading { progress: new }) => {
                new > old && *new < 1.0
            }
            (JobState::Uploading { .. }, JobState::Uploaded { .. }) => true,
            (JobState::Uploading { .. }, JobState::Failed { .. }) => true,
            (JobState::Failed { .. }, JobState::Uploading { progress }) => *progress == 0.0,
            _ => false,
        }
    }
}

/// One image's upload, owned by the aggregator.
#[derive(Debug, Clone, Serialize)]
pub struct UploadJob {
    pub id: JobId,
    #[serde(skip_serializing)]
    pub payload: Bytes,
    #[serde(flatten)]
    pub state: JobState,
    /// Attempt counter, bumped on every start or retry
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl UploadJob {
    pub(crate) fn new(id: JobId, payload: Bytes) -> Self {
        Self {
            id,
            payload,
            state: JobState::Idle,
            attempt: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

/// Point-in-time view of the aggregator.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    /// Jobs in the order they were first added
    pub jobs: Vec<UploadJob>,
    /// Urls of uploaded jobs, in completion order
    pub completed_urls: Vec<Url>,
    pub all_uploaded: bool,
    pub any_failed: bool,
}

impl Snapshot {
    pub fn job(&self, id: &str) -> Option<&UploadJob> {
        self.jobs.iter().find(|job| job.id.as_str() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.job(id).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// No job is waiting on the transport.
    pub fn is_settled(&self) -> bool {
        !self.jobs.iter().any(|job| job.state.is_uploading())
    }
}

/// Aggregator event
#[derive(Debug, Clone)]
pub enum AggregatorEvent {
    JobAdded {
        id: JobId,
    },

    StateChanged {
        id: JobId,
        old_state: JobState,
        new_state: JobState,
    },

    Progress {
        id: JobId,
        progress: f64,
    },

    JobRemoved {
        id: JobId,
    },

    Reset,
}

/// Commands handled by the aggregator worker
pub(crate) enum AggregatorCommand {
    AddJob {
        id: JobId,
        payload: Bytes,
        reply: oneshot::Sender<Result<()>>,
    },

    RetryJob {
        id: JobId,
        payload: Bytes,
        reply: oneshot::Sender<Result<()>>,
    },

    RemoveJob {
        id: JobId,
        reply: oneshot::Sender<()>,
    },

    Reset {
        reply: oneshot::Sender<()>,
    },

    GetJob {
        id: JobId,
        reply: oneshot::Sender<Option<UploadJob>>,
    },

    Snapshot {
        reply: oneshot::Sender<Snapshot>,
    },

    Shutdown,
}

const _: () = {
    fn assert_send<T: Send>() {}
    fn assert_types() {
        assert_send::<UploadJob>();
        assert_send::<Snapshot>();
        assert_send::<AggregatorEvent>();
    }
};
