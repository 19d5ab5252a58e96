use crate::error::{Error, Result, RuntimeError};
use crate::services::helpers::docker_helper::{ContainerIdentity, ContainerRuntime, ContainerState};
use crate::services::helpers::stats_helper::StatsDocument;
use bollard::models::ContainerInspectResponse;

/// What the fetcher learned about one container.
#[derive(Debug)]
pub struct FetchedContainer {
    pub metadata: ContainerInspectResponse,
    /// `Ok(None)` when the container is not running.
    pub stats: Result<Option<StatsDocument>>,
}

/// Reads metadata and, for running containers, one stats snapshot.
pub struct StatsFetcher<'a> {
    runtime: &'a dyn ContainerRuntime,
}

impl<'a> StatsFetcher<'a> {
    pub fn new(runtime: &'a dyn ContainerRuntime) -> Self {
        Self { runtime }
    }

    /// Fetches a container.
    ///
    /// # Returns
    /// * `Err(Error::MetadataUnavailable)` if the container cannot be inspected.
    /// * `Ok(FetchedContainer)` otherwise; a failed snapshot is reported in
    ///   `stats` as `Error::StatsUnavailable` so the metadata stays usable.
    pub async fn fetch(
        &self,
        identity: &ContainerIdentity,
        state: &ContainerState,
    ) -> Result<FetchedContainer> {
        let metadata = self.inspect(&identity.id).await?;
        let stats = if state.is_running() {
            self.snapshot(&identity.id).await.map(Some)
        } else {
            Ok(None)
        };

        Ok(FetchedContainer { metadata, stats })
    }

    pub async fn inspect(&self, id: &str) -> Result<ContainerInspectResponse> {
        self.runtime
            .inspect_container(id)
            .await
            .map_err(|source| Error::MetadataUnavailable {
                id: id.to_owned(),
                source,
            })
    }

    pub async fn snapshot(&self, id: &str) -> Result<StatsDocument> {
        let raw = self
            .runtime
            .container_stats(id)
            .await
            .map_err(|source| Error::StatsUnavailable {
                id: id.to_owned(),
                source,
            })?;

        StatsDocument::decode(raw).map_err(|err| Error::StatsUnavailable {
            id: id.to_owned(),
            source: RuntimeError::Decode(err),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{nginx_stats, FakeRuntime};
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn identity(id: &str) -> ContainerIdentity {
        ContainerIdentity {
            id: id.to_owned(),
            names: vec![format!("/{id}")],
        }
    }

    #[tokio::test]
    async fn fetches_metadata_and_stats_of_running_container() {
        let runtime = FakeRuntime::default().with_stats("aaa", nginx_stats());
        let fetched = StatsFetcher::new(&runtime)
            .fetch(&identity("aaa"), &ContainerState::Running)
            .await
            .unwrap();

        assert_eq!(fetched.metadata.id.as_deref(), Some("aaa"));
        let document = fetched.stats.unwrap().unwrap();
        assert_eq!(document.raw, nginx_stats());
        assert_eq!(runtime.open_streams.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn skips_stats_of_stopped_container() {
        let runtime = FakeRuntime::default().with_stats("aaa", nginx_stats());
        let fetched = StatsFetcher::new(&runtime)
            .fetch(&identity("aaa"), &ContainerState::Exited)
            .await
            .unwrap();

        assert!(fetched.stats.unwrap().is_none());
        assert_eq!(runtime.stats_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn inspect_failure_is_metadata_unavailable() {
        let runtime = FakeRuntime::default().with_failing_inspect("aaa");
        let err = StatsFetcher::new(&runtime)
            .fetch(&identity("aaa"), &ContainerState::Running)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MetadataUnavailable { id, .. } if id == "aaa"));
        assert_eq!(runtime.stats_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stats_and_decode_failures_are_stats_unavailable() {
        let runtime = FakeRuntime::default().with_stats("bad", json!({ "pids_stats": { "current": "five" } }));
        let fetcher = StatsFetcher::new(&runtime);

        let missing = fetcher
            .fetch(&identity("none"), &ContainerState::Running)
            .await
            .unwrap();
        assert!(matches!(
            missing.stats,
            Err(Error::StatsUnavailable { source: RuntimeError::EmptyStream, .. })
        ));

        let undecodable = fetcher
            .fetch(&identity("bad"), &ContainerState::Running)
            .await
            .unwrap();
        assert!(matches!(
            undecodable.stats,
            Err(Error::StatsUnavailable { source: RuntimeError::Decode(_), .. })
        ));
        assert_eq!(runtime.open_streams.load(Ordering::SeqCst), 0);
    }
}
