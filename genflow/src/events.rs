//! Job status fan-out.
//!
//! The hub lives in [`crate::AppState`]; the worker publishes every status change and SSE
//! handlers subscribe to the jobs they care about.

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use std::pin::Pin;
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};
use utoipa::ToSchema;

use crate::{
    db::models::jobs::{JobDBResponse, JobStatus},
    types::{JobId, UserId},
};

/// A job changed status
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct JobEvent {
    #[schema(value_type = String, format = "uuid")]
    pub job_id: JobId,
    #[serde(skip)]
    pub user_id: UserId,
    pub status: JobStatus,
    pub result_path: Option<String>,
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&JobDBResponse> for JobEvent {
    fn from(job: &JobDBResponse) -> Self {
        Self {
            job_id: job.id,
            user_id: job.user_id,
            status: job.status,
            result_path: job.result_path.clone(),
            error_message: job.error_message.clone(),
            updated_at: job.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct JobEventHub {
    tx: broadcast::Sender<JobEvent>,
}

impl Default for JobEventHub {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl JobEventHub {
    /// Subscribers that fall more than `capacity` events behind skip the missed events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: JobEvent) {
        // No subscribers is not an error
        let _ = self.tx.send(event);
    }

    /// Events for one job, ending after its terminal status
    pub fn subscribe(&self, job_id: JobId) -> Pin<Box<dyn Stream<Item = JobEvent> + Send>> {
        let rx = self.tx.subscribe();
        let events: Pin<Box<dyn Stream<Item = JobEvent> + Send>> =
            Box::pin(BroadcastStream::new(rx).filter_map(move |result| match result {
                Ok(event) if event.job_id == job_id => Some(event),
                _ => None,
            }));

        Box::pin(futures::stream::unfold((events, false), |(mut events, finished)| async move {
            if finished {
                return None;
            }
            let event = events.next().await?;
            let finished = event.status.is_terminal();
            Some((event, (events, finished)))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn event(job_id: JobId, status: JobStatus) -> JobEvent {
        JobEvent {
            job_id,
            user_id: Uuid::new_v4(),
            status,
            result_path: None,
            error_message: None,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_subscribe_filters_and_ends_after_terminal() {
        let hub = JobEventHub::default();
        let job = Uuid::new_v4();
        let mut stream = hub.subscribe(job);

        hub.publish(event(Uuid::new_v4(), JobStatus::Processing));
        hub.publish(event(job, JobStatus::Processing));
        hub.publish(event(job, JobStatus::Completed));

        assert_eq!(stream.next().await.unwrap().status, JobStatus::Processing);
        assert_eq!(stream.next().await.unwrap().status, JobStatus::Completed);
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn test_publish_without_subscribers() {
        JobEventHub::default().publish(event(Uuid::new_v4(), JobStatus::Pending));
    }
}
