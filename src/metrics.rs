use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
#[cfg(test)] use mockall::automock;
use tracing::info;


/// Receives fire-and-forget notifications about protocol events. The engines call into it but
///  never inspect anything it returns, and `report` is called once at shutdown.
#[cfg_attr(test, automock)]
pub trait MetricsSink: Send + Sync + 'static {
    fn record_packet_sent(&self);
    fn record_packet_received(&self);
    fn record_packet_retransmitted(&self);
    fn record_message_sent(&self);
    fn record_message_received(&self);
    fn record_message_lost(&self);
    fn record_message_latency(&self, latency: Duration);

    fn report(&self);
}


#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsReport {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_retransmitted: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub messages_lost: u64,
    pub latency: Option<LatencySummary>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LatencySummary {
    pub count: usize,
    pub min: Duration,
    pub max: Duration,
    pub mean: Duration,
}
impl LatencySummary {
    fn from_samples(samples: &[Duration]) -> Option<LatencySummary> {
        let min = *samples.iter().min()?;
        let max = *samples.iter().max()?;
        let total: Duration = samples.iter().sum();

        Some(LatencySummary {
            count: samples.len(),
            min,
            max,
            mean: total / samples.len() as u32,
        })
    }
}


/// Counts events in memory and logs a summary when the process shuts down.
#[derive(Debug, Default)]
pub struct StatsCollector {
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    packets_retransmitted: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    messages_lost: AtomicU64,
    latencies: Mutex<Vec<Duration>>,
}

impl StatsCollector {
    pub fn new() -> StatsCollector {
        Default::default()
    }

    pub fn snapshot(&self) -> StatsReport {
        let latency = match self.latencies.lock() {
            Ok(latencies) => LatencySummary::from_samples(&latencies),
            Err(poisoned) => LatencySummary::from_samples(&poisoned.into_inner()),
        };

        StatsReport {
            packets_sent: self.packets_sent.load(Ordering::Acquire),
            packets_received: self.packets_received.load(Ordering::Acquire),
            packets_retransmitted: self.packets_retransmitted.load(Ordering::Acquire),
            messages_sent: self.messages_sent.load(Ordering::Acquire),
            messages_received: self.messages_received.load(Ordering::Acquire),
            messages_lost: self.messages_lost.load(Ordering::Acquire),
            latency,
        }
    }

    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::AcqRel);
    }
}

impl MetricsSink for StatsCollector {
    fn record_packet_sent(&self) {
        Self::inc(&self.packets_sent);
    }

    fn record_packet_received(&self) {
        Self::inc(&self.packets_received);
    }

    fn record_packet_retransmitted(&self) {
        Self::inc(&self.packets_retransmitted);
    }

    fn record_message_sent(&self) {
        Self::inc(&self.messages_sent);
    }

    fn record_message_received(&self) {
        Self::inc(&self.messages_received);
    }

    fn record_message_lost(&self) {
        Self::inc(&self.messages_lost);
    }

    fn record_message_latency(&self, latency: Duration) {
        match self.latencies.lock() {
            Ok(mut latencies) => latencies.push(latency),
            Err(poisoned) => poisoned.into_inner().push(latency),
        }
    }

    fn report(&self) {
        let report = self.snapshot();
        info!("packets: sent={} received={} retransmitted={}", report.packets_sent, report.packets_received, report.packets_retransmitted);
        info!("messages: sent={} received={} lost={}", report.messages_sent, report.messages_received, report.messages_lost);
        match &report.latency {
            Some(l) => info!("latency: n={} min={:?} mean={:?} max={:?}", l.count, l.min, l.mean, l.max),
            None => info!("latency: no messages acknowledged"),
        }
    }
}
