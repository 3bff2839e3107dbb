//! Metric Sender, spec §4.6 (C7): converts protocol metrics into transport
//! metrics, expands the two Prometheus composite shapes, and hands the
//! result to the Harvester as one batch.
//!
//! Grounded on the teacher's `/metrics` Prometheus exposition in `lib.rs`:
//! the same per-quantile/per-bucket attribute naming (`quantile=`, `le=`)
//! the teacher uses when rendering its own histograms is reused here for
//! the *inbound* expansion instead of outbound exposition.

use crate::calculators::Calculators;
use crate::error::AgentError;
use crate::harvester::{Harvester, InfraMetricsBatch};
use crate::model::{CommonBlock, Metric, MetricType, MetricValue};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Formats a float as its shortest decimal representation, matching the
/// `quantile="95"` / `le="0.5"` label style of Prometheus exposition text
/// (an integral value never carries a trailing `.0`).
fn label_value(v: f64) -> String {
    if v == v.trunc() && v.is_finite() {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

fn gauge(name: &str, value: f64, interval_ms: u64, attributes: BTreeMap<String, serde_json::Value>) -> Metric {
    Metric {
        name: name.to_string(),
        metric_type: MetricType::Gauge,
        value: MetricValue::Number(value),
        timestamp: None,
        interval_ms: Some(interval_ms),
        attributes,
    }
}

fn count(name: &str, value: f64, interval_ms: u64, attributes: BTreeMap<String, serde_json::Value>) -> Metric {
    Metric {
        name: name.to_string(),
        metric_type: MetricType::Count,
        value: MetricValue::Number(value),
        timestamp: None,
        interval_ms: Some(interval_ms),
        attributes,
    }
}

fn summary_delta(name: &str, sum: f64, interval_ms: u64, attributes: BTreeMap<String, serde_json::Value>) -> Metric {
    Metric {
        name: name.to_string(),
        metric_type: MetricType::Summary,
        value: MetricValue::Summary {
            count: 1.0,
            sum,
            min: f64::NAN,
            max: f64::NAN,
        },
        timestamp: None,
        interval_ms: Some(interval_ms),
        attributes,
    }
}

/// Converts and expands protocol metrics, then forwards them to a
/// `Harvester` as a single infra-metrics batch (spec §4.6).
pub struct MetricSender<'a> {
    calculators: &'a Calculators,
    harvester: &'a dyn Harvester,
}

impl<'a> MetricSender<'a> {
    pub fn new(calculators: &'a Calculators, harvester: &'a dyn Harvester) -> Self {
        Self {
            calculators,
            harvester,
        }
    }

    /// `send(common, metrics)`, spec §4.6.
    pub async fn send(&self, common: CommonBlock, metrics: Vec<Metric>) -> Result<(), AgentError> {
        let now = Utc::now();
        let mut out = Vec::with_capacity(metrics.len());
        for metric in metrics {
            self.convert(metric, now, &mut out);
        }
        self.harvester
            .submit_infra_metrics(InfraMetricsBatch {
                common,
                metrics: out,
            })
            .await
    }

    fn convert(&self, metric: Metric, now: DateTime<Utc>, out: &mut Vec<Metric>) {
        let Metric {
            name,
            metric_type,
            value,
            timestamp,
            interval_ms,
            attributes,
        } = metric;

        match metric_type {
            MetricType::Gauge | MetricType::Count | MetricType::Summary => {
                out.push(Metric {
                    name,
                    metric_type,
                    value,
                    timestamp,
                    interval_ms,
                    attributes,
                });
            }
            MetricType::Rate => match as_number(&name, &value) {
                Some(v) => {
                    let r = self.calculators.rate(&name, &attributes, v, now);
                    if r.valid {
                        out.push(gauge(&name, r.value, r.interval_ms, attributes));
                    } else {
                        tracing::debug!(metric = %name, "no calculation made");
                    }
                }
                None => tracing::error!(metric = %name, "failed to parse rate metric value"),
            },
            MetricType::CumulativeRate => match as_number(&name, &value) {
                Some(v) => {
                    let r = self.calculators.cumulative_rate(&name, &attributes, v, now);
                    if r.valid {
                        out.push(gauge(&name, r.value, r.interval_ms, attributes));
                    } else {
                        tracing::debug!(metric = %name, "no calculation made");
                    }
                }
                None => tracing::error!(metric = %name, "failed to parse cumulative-rate metric value"),
            },
            MetricType::CumulativeCount => match as_number(&name, &value) {
                Some(v) => {
                    let r = self.calculators.cumulative_count(&name, &attributes, v, now);
                    if r.valid {
                        out.push(count(&name, r.value, r.interval_ms, attributes));
                    } else {
                        tracing::debug!(metric = %name, "no calculation made");
                    }
                }
                None => tracing::error!(metric = %name, "failed to parse cumulative-count metric value"),
            },
            MetricType::PrometheusSummary => match value {
                MetricValue::PrometheusSummary {
                    sample_count,
                    sample_sum,
                    quantiles,
                } => self.expand_summary(&name, sample_count, sample_sum, &quantiles, &attributes, now, out),
                _ => tracing::error!(metric = %name, "prometheus-summary metric missing summary shape"),
            },
            MetricType::PrometheusHistogram => match value {
                MetricValue::PrometheusHistogram {
                    sample_sum, buckets, ..
                } => self.expand_histogram(&name, sample_sum, &buckets, &attributes, now, out),
                _ => tracing::error!(metric = %name, "prometheus-histogram metric missing histogram shape"),
            },
        }
    }

    fn expand_summary(
        &self,
        name: &str,
        sample_count: f64,
        sample_sum: f64,
        quantiles: &[crate::model::Quantile],
        attributes: &BTreeMap<String, serde_json::Value>,
        now: DateTime<Utc>,
        out: &mut Vec<Metric>,
    ) {
        let sum_name = format!("{name}_sum");
        match self.calculators.delta(&sum_name, attributes, sample_sum, now) {
            Some(delta) => out.push(summary_delta(&sum_name, delta, 0, attributes.clone())),
            None => tracing::debug!(metric = %sum_name, "no calculation made"),
        }

        let count_name = format!("{name}_count");
        let c = self
            .calculators
            .cumulative_count(&count_name, attributes, sample_count, now);
        if c.valid {
            out.push(count(&count_name, c.value, c.interval_ms, attributes.clone()));
        } else {
            tracing::debug!(metric = %count_name, "no calculation made");
        }

        for q in quantiles {
            let mut attrs = attributes.clone();
            attrs.insert(
                "quantile".to_string(),
                serde_json::Value::String(label_value(q.quantile)),
            );
            out.push(gauge(name, q.value, 0, attrs));
        }
    }

    fn expand_histogram(
        &self,
        name: &str,
        sample_sum: f64,
        buckets: &[crate::model::HistogramBucket],
        attributes: &BTreeMap<String, serde_json::Value>,
        now: DateTime<Utc>,
        out: &mut Vec<Metric>,
    ) {
        let sum_name = format!("{name}_sum");
        match self.calculators.delta(&sum_name, attributes, sample_sum, now) {
            Some(delta) => out.push(summary_delta(&sum_name, delta, 0, attributes.clone())),
            None => tracing::debug!(metric = %sum_name, "no calculation made"),
        }

        let bucket_name = format!("{name}_bucket");
        for bucket in buckets {
            let mut attrs = attributes.clone();
            attrs.insert(
                "le".to_string(),
                serde_json::Value::String(label_value(bucket.upper_bound)),
            );
            let c = self
                .calculators
                .cumulative_count(&bucket_name, &attrs, bucket.cumulative_count, now);
            if c.valid {
                out.push(count(&bucket_name, c.value, c.interval_ms, attrs));
            } else {
                tracing::debug!(metric = %bucket_name, "no calculation made");
            }
        }
    }
}

fn as_number(name: &str, value: &MetricValue) -> Option<f64> {
    match value {
        MetricValue::Number(v) => Some(*v),
        MetricValue::Raw(serde_json::Value::Number(n)) => n.as_f64(),
        _ => {
            tracing::error!(metric = %name, "metric value is not numeric");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HistogramBucket, Quantile};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct CollectingHarvester(Mutex<Vec<InfraMetricsBatch>>);

    #[async_trait]
    impl Harvester for CollectingHarvester {
        async fn submit_infra_metrics(&self, batch: InfraMetricsBatch) -> Result<(), AgentError> {
            self.0.lock().unwrap().push(batch);
            Ok(())
        }
    }

    fn prom_summary(sample_count: f64, sample_sum: f64, quantiles: Vec<Quantile>) -> Metric {
        Metric {
            name: "name".to_string(),
            metric_type: MetricType::PrometheusSummary,
            value: MetricValue::PrometheusSummary {
                sample_count,
                sample_sum,
                quantiles,
            },
            timestamp: None,
            interval_ms: None,
            attributes: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn prometheus_summary_expansion_matches_spec_example() {
        let calculators = Calculators::new();
        let harvester = CollectingHarvester(Mutex::new(Vec::new()));
        let sender = MetricSender::new(&calculators, &harvester);

        let q = vec![Quantile {
            quantile: 95.0,
            value: 3.0,
        }];
        sender
            .send(CommonBlock::default(), vec![prom_summary(1.0, 2.0, q.clone())])
            .await
            .unwrap();
        // First observation: only the passthrough gauge emits, sum/count need a second sample.
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        sender
            .send(CommonBlock::default(), vec![prom_summary(1.0, 2.0, q)])
            .await
            .unwrap();

        let batches = harvester.0.lock().unwrap();
        let second = &batches[1];
        let count_metric = second
            .metrics
            .iter()
            .find(|m| m.name == "name_count")
            .expect("name_count present on second send");
        assert_eq!(count_metric.value, MetricValue::Number(0.0));
        assert_eq!(count_metric.metric_type, MetricType::Count);

        let sum_metric = second
            .metrics
            .iter()
            .find(|m| m.name == "name_sum")
            .expect("name_sum present on second send");
        match &sum_metric.value {
            MetricValue::Summary { count, sum, min, max } => {
                assert_eq!(*count, 1.0);
                assert_eq!(*sum, 0.0);
                assert!(min.is_nan() && max.is_nan());
            }
            other => panic!("unexpected value shape: {other:?}"),
        }

        let gauge_metric = second
            .metrics
            .iter()
            .find(|m| m.name == "name" && m.metric_type == MetricType::Gauge)
            .expect("quantile gauge present");
        assert_eq!(gauge_metric.value, MetricValue::Number(3.0));
        assert_eq!(
            gauge_metric.attributes.get("quantile"),
            Some(&serde_json::Value::String("95".to_string()))
        );
    }

    #[tokio::test]
    async fn prometheus_histogram_expands_per_bucket_counts() {
        let calculators = Calculators::new();
        let harvester = CollectingHarvester(Mutex::new(Vec::new()));
        let sender = MetricSender::new(&calculators, &harvester);

        let metric = |sum: f64, buckets: Vec<HistogramBucket>| Metric {
            name: "latency".to_string(),
            metric_type: MetricType::PrometheusHistogram,
            value: MetricValue::PrometheusHistogram {
                sample_count: 0.0,
                sample_sum: sum,
                buckets,
            },
            timestamp: None,
            interval_ms: None,
            attributes: BTreeMap::new(),
        };
        let buckets = vec![HistogramBucket {
            cumulative_count: 5.0,
            upper_bound: 0.5,
        }];
        sender
            .send(CommonBlock::default(), vec![metric(1.0, buckets.clone())])
            .await
            .unwrap();
        let buckets2 = vec![HistogramBucket {
            cumulative_count: 8.0,
            upper_bound: 0.5,
        }];
        sender
            .send(CommonBlock::default(), vec![metric(2.0, buckets2)])
            .await
            .unwrap();

        let batches = harvester.0.lock().unwrap();
        let bucket_metric = batches[1]
            .metrics
            .iter()
            .find(|m| m.name == "latency_bucket")
            .expect("latency_bucket present");
        assert_eq!(bucket_metric.value, MetricValue::Number(3.0));
        assert_eq!(
            bucket_metric.attributes.get("le"),
            Some(&serde_json::Value::String("0.5".to_string()))
        );
    }

    #[tokio::test]
    async fn rate_metric_below_validity_is_dropped_silently() {
        let calculators = Calculators::new();
        let harvester = CollectingHarvester(Mutex::new(Vec::new()));
        let sender = MetricSender::new(&calculators, &harvester);

        let metric = Metric {
            name: "errorsPerSecond".to_string(),
            metric_type: MetricType::Rate,
            value: MetricValue::Number(10.0),
            timestamp: None,
            interval_ms: None,
            attributes: BTreeMap::new(),
        };
        sender.send(CommonBlock::default(), vec![metric]).await.unwrap();
        let batches = harvester.0.lock().unwrap();
        assert!(batches[0].metrics.is_empty(), "first observation never emits");
    }
}
