use crate::error::{Error, Result};
use crate::metrics::{MetricSample, MetricSink};
use crate::services::deriver;
use crate::services::fetcher::StatsFetcher;
use crate::services::helpers::docker_helper::{ContainerIdentity, ContainerRuntime, ContainerState};
use crate::services::labels::{LabelSpec, TemplateContext};
use bollard::models::ContainerSummary;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

/// Runs scrapes: one call to [`Collector::scrape`] lists every container and
/// collects all of them concurrently.
pub struct Collector {
    runtime: Arc<dyn ContainerRuntime>,
    labels: Arc<LabelSpec>,
    timeout: Duration,
}

impl Collector {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, labels: Arc<LabelSpec>, timeout: Duration) -> Self {
        Self {
            runtime,
            labels,
            timeout,
        }
    }

    /// Performs one scrape.
    ///
    /// # Returns
    /// * `Ok(MetricSink)` holding the samples of every container that could be
    ///   collected. Containers that failed are logged and left out.
    /// * `Err(Error::Enumeration)` if the container list itself is unavailable.
    /// * `Err(Error::ScrapeTimeout)` if the scrape ran past the timeout. All
    ///   unfinished per-container work is aborted.
    pub async fn scrape(&self) -> Result<Arc<MetricSink>> {
        tokio::time::timeout(self.timeout, self.collect())
            .await
            .map_err(|_| Error::ScrapeTimeout(self.timeout))?
    }

    async fn collect(&self) -> Result<Arc<MetricSink>> {
        let started = Instant::now();
        let containers = self
            .runtime
            .list_containers()
            .await
            .map_err(Error::Enumeration)?;
        let sink = Arc::new(MetricSink::new(&self.labels.label_names())?);
        let count = containers.len();

        // Dropping the set (e.g. on timeout) aborts every task still running.
        let mut tasks = JoinSet::new();
        for summary in containers {
            let runtime = Arc::clone(&self.runtime);
            let labels = Arc::clone(&self.labels);
            let sink = Arc::clone(&sink);

            tasks.spawn(async move {
                let identity = ContainerIdentity::from_summary(&summary);
                if let Err(err) = collect_container(&*runtime, &labels, &identity, &summary, &sink).await {
                    log::error!("cannot collect container {}: {}", identity, err);
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                log::error!("container collection task failed: {}", err);
            }
        }

        log::debug!("scraped {} containers in {:?}", count, started.elapsed());
        Ok(sink)
    }
}

/// Collects one container into the sink.
///
/// `info` is emitted as soon as metadata is known, even if the stats snapshot
/// then fails; the snapshot error is returned after that.
async fn collect_container(
    runtime: &dyn ContainerRuntime,
    labels: &LabelSpec,
    identity: &ContainerIdentity,
    summary: &ContainerSummary,
    sink: &MetricSink,
) -> Result<()> {
    let state = ContainerState::from_summary(summary);
    let fetched = StatsFetcher::new(runtime).fetch(identity, &state).await?;

    let (stats, stats_error) = match fetched.stats {
        Ok(stats) => (stats, None),
        Err(err) => (None, Some(err)),
    };

    let label_values = labels.evaluate(&TemplateContext {
        identity,
        state: &state,
        summary,
        metadata: &fetched.metadata,
        stats: stats.as_ref().map(|document| &document.raw),
    });

    for derived in deriver::derive(stats.as_ref().map(|document| &document.snapshot)) {
        sink.emit(&MetricSample {
            metric: derived.metric,
            labels: label_values.clone(),
            value: derived.value,
        })?;
    }

    match stats_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{nginx_stats, FakeRuntime};
    use std::sync::atomic::Ordering;

    fn collector(runtime: Arc<FakeRuntime>, labels: LabelSpec) -> Collector {
        Collector::new(runtime, Arc::new(labels), Duration::from_secs(5))
    }

    fn sample_lines(output: &str) -> Vec<&str> {
        output.lines().filter(|line| !line.starts_with('#')).collect()
    }

    #[tokio::test]
    async fn exports_running_and_stopped_containers() {
        let runtime = Arc::new(
            FakeRuntime::default()
                .with_container("aaa", "nginx", "running")
                .with_stats("aaa", nginx_stats())
                .with_container("bbb", "redis", "exited"),
        );

        let output = collector(runtime.clone(), LabelSpec::default())
            .scrape()
            .await
            .unwrap()
            .render()
            .unwrap();

        let mut lines = sample_lines(&output);
        lines.sort();
        assert_eq!(
            lines,
            vec![
                "docker_container_blkio_read_bytes_total{name=\"nginx\"} 77824",
                "docker_container_blkio_write_bytes_total{name=\"nginx\"} 8192",
                "docker_container_cpu_seconds_total{name=\"nginx\"} 138.186",
                "docker_container_info{name=\"nginx\"} 1",
                "docker_container_info{name=\"redis\"} 1",
                "docker_container_memory_limit_bytes{name=\"nginx\"} 3521634304",
                "docker_container_memory_usage_bytes{name=\"nginx\"} 4280320",
                "docker_container_network_rx_bytes_total{name=\"nginx\"} 6062",
                "docker_container_network_tx_bytes_total{name=\"nginx\"} 9047",
                "docker_container_pids{name=\"nginx\"} 5",
            ]
        );
        assert!(output.contains("# TYPE docker_container_pids gauge"));
        assert!(output.contains("# TYPE docker_container_network_rx_bytes_total counter"));
        // Stats are only requested for the running container.
        assert_eq!(runtime.stats_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_stats_still_emit_info_and_spare_other_containers() {
        let runtime = Arc::new(
            FakeRuntime::default()
                .with_container("aaa", "nginx", "running")
                .with_stats("aaa", nginx_stats())
                .with_container("bbb", "broken", "running"),
        );

        let output = collector(runtime, LabelSpec::default())
            .scrape()
            .await
            .unwrap()
            .render()
            .unwrap();

        let lines = sample_lines(&output);
        assert!(lines.contains(&"docker_container_info{name=\"broken\"} 1"));
        assert!(!lines.iter().any(|line| line.contains("name=\"broken\"") && !line.starts_with("docker_container_info")));
        assert_eq!(lines.iter().filter(|line| line.contains("name=\"nginx\"")).count(), 9);
    }

    #[tokio::test]
    async fn undecodable_stats_are_isolated() {
        let runtime = Arc::new(
            FakeRuntime::default()
                .with_container("aaa", "nginx", "running")
                .with_stats("aaa", serde_json::json!({ "memory_stats": { "usage": "lots" } })),
        );

        let output = collector(runtime, LabelSpec::default())
            .scrape()
            .await
            .unwrap()
            .render()
            .unwrap();

        assert_eq!(sample_lines(&output), vec!["docker_container_info{name=\"nginx\"} 1"]);
    }

    #[tokio::test]
    async fn failed_inspect_skips_only_that_container() {
        let runtime = Arc::new(
            FakeRuntime::default()
                .with_container("aaa", "gone", "running")
                .with_failing_inspect("aaa")
                .with_container("bbb", "redis", "exited"),
        );

        let output = collector(runtime, LabelSpec::default())
            .scrape()
            .await
            .unwrap()
            .render()
            .unwrap();

        assert_eq!(sample_lines(&output), vec!["docker_container_info{name=\"redis\"} 1"]);
    }

    #[tokio::test]
    async fn enumeration_failure_fails_the_scrape() {
        let runtime = Arc::new(FakeRuntime::failing_list());
        let result = collector(runtime, LabelSpec::default()).scrape().await;
        assert!(matches!(result, Err(Error::Enumeration(_))));
    }

    #[tokio::test]
    async fn no_containers_yields_empty_output() {
        let runtime = Arc::new(FakeRuntime::default());
        let output = collector(runtime, LabelSpec::default())
            .scrape()
            .await
            .unwrap()
            .render()
            .unwrap();
        assert!(sample_lines(&output).is_empty());
    }

    #[tokio::test]
    async fn custom_labels_appear_on_every_sample() {
        let labels = LabelSpec::new([
            ("health".to_owned(), "{{.ContainerJSON.State.Health.Status}}".to_owned()),
            ("state".to_owned(), "{{.State}}".to_owned()),
        ])
        .unwrap();
        let runtime = Arc::new(
            FakeRuntime::default()
                .with_container("aaa", "nginx", "running")
                .with_stats("aaa", nginx_stats())
                .with_container("bbb", "redis", "exited"),
        );

        let output = collector(runtime, labels)
            .scrape()
            .await
            .unwrap()
            .render()
            .unwrap();

        let lines = sample_lines(&output);
        assert_eq!(lines.len(), 10);
        assert!(lines.contains(&"docker_container_info{health=\"\",name=\"redis\",state=\"exited\"} 1"));
        assert!(lines.contains(&"docker_container_pids{health=\"\",name=\"nginx\",state=\"running\"} 5"));
    }

    #[tokio::test]
    async fn timeout_aborts_pending_work_and_releases_streams() {
        let runtime = Arc::new(
            FakeRuntime::default()
                .with_container("aaa", "slow", "running")
                .with_stats("aaa", nginx_stats())
                .with_stats_delay(Duration::from_secs(60)),
        );
        let collector = Collector::new(
            runtime.clone(),
            Arc::new(LabelSpec::default()),
            Duration::from_millis(50),
        );

        let result = collector.scrape().await;
        assert!(matches!(result, Err(Error::ScrapeTimeout(_))));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runtime.open_streams.load(Ordering::SeqCst), 0);
    }
}
