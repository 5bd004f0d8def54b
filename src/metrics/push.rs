use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;

use derive_more::{Display, Error, From};

use super::{BackupMetrics, MetricsSink};

const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

/// Everything but the unreserved characters of RFC 3986.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

#[derive(Debug, Display, Error, From)]
/// The metrics couldn't be forwarded to the Pushgateway.
pub enum MetricsForwardFailed {
    /// The gateway is unreachable or the request couldn't be built.
    #[display("Pushgateway request failed: {_0}")]
    #[from]
    Request(reqwest::Error),
    /// The gateway rejected the push.
    #[display("Pushgateway rejected the push with {_0}")]
    Status(#[error(ignore)] StatusCode),
    /// The job label is empty, so there's no grouping key to push to.
    #[display("Job label is empty")]
    EmptyJob,
}

/// A [Prometheus Pushgateway](https://github.com/prometheus/pushgateway).
#[derive(Debug, Clone)]
pub struct PushGateway {
    address: String,
}

impl PushGateway {
    /// Creates a gateway for `address`, using `http://` if it has no scheme.
    pub fn new(address: &str) -> Self {
        let address = address.trim().trim_end_matches('/');
        let address = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };

        Self { address }
    }

    /// URL of the grouping key `job`.
    ///
    /// Labels containing `/` use the `job@base64/<value>` form of the Pushgateway, all others
    /// are percent-encoded.
    pub fn url(&self, job: &str) -> Result<String, MetricsForwardFailed> {
        if job.is_empty() {
            return Err(MetricsForwardFailed::EmptyJob);
        }

        let url = if job.contains('/') {
            let encoded = URL_SAFE_NO_PAD.encode(job);
            format!("{}/metrics/job@base64/{encoded}", self.address)
        } else {
            let encoded = utf8_percent_encode(job, PATH_SEGMENT);
            format!("{}/metrics/job/{encoded}", self.address)
        };
        Ok(url)
    }
}

impl MetricsSink for PushGateway {
    fn push(&self, job: &str, metrics: &BackupMetrics) -> Result<(), MetricsForwardFailed> {
        let url = self.url(job)?;
        log::debug!(target: "metrics::push", "Pushing metrics to {url}");

        // a blocking client must not be dropped inside the scheduler's runtime
        let client = reqwest::blocking::Client::new();
        let response = client
            .put(&url)
            .header(CONTENT_TYPE, TEXT_FORMAT)
            .body(metrics.render())
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(MetricsForwardFailed::Status(status));
        }

        log::trace!(target: "metrics::push", "Pushgateway answered {status}");
        Ok(())
    }
}
