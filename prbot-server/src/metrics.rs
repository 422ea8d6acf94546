//! Process counters rendered in the Prometheus text format.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct LabeledCounter {
    values: Mutex<BTreeMap<Vec<String>, u64>>,
}

impl LabeledCounter {
    fn lock(&self) -> MutexGuard<'_, BTreeMap<Vec<String>, u64>> {
        // A panic while holding the lock leaves a valid map behind.
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn inc(&self, labels: &[&str]) {
        let key = labels.iter().map(|l| l.to_string()).collect();
        *self.lock().entry(key).or_insert(0) += 1;
    }

    fn get(&self, labels: &[&str]) -> u64 {
        let key: Vec<String> = labels.iter().map(|l| l.to_string()).collect();
        self.lock().get(&key).copied().unwrap_or(0)
    }

    fn render(&self, out: &mut String, name: &str, help: &str, label_names: &[&str]) {
        let _ = writeln!(out, "# HELP {} {}", name, help);
        let _ = writeln!(out, "# TYPE {} counter", name);
        for (labels, value) in self.lock().iter() {
            let pairs: Vec<String> = label_names
                .iter()
                .zip(labels)
                .map(|(k, v)| format!("{}=\"{}\"", k, escape(v)))
                .collect();
            let _ = writeln!(out, "{}{{{}}} {}", name, pairs.join(","), value);
        }
    }
}

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Counters shared by the webhook front-end and the workers.
#[derive(Default)]
pub struct Metrics {
    webhook_requests: LabeledCounter,
    commands: LabeledCounter,
    jobs: LabeledCounter,
    rate_limited: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn webhook_request(&self, platform: &str, outcome: &str) {
        self.webhook_requests.inc(&[platform, outcome]);
    }

    pub fn command(&self, command: &str, result: &str) {
        self.commands.inc(&[command, result]);
    }

    pub fn job(&self, result: &str) {
        self.jobs.inc(&[result]);
    }

    pub fn rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_count(&self, command: &str, result: &str) -> u64 {
        self.commands.get(&[command, result])
    }

    pub fn webhook_request_count(&self, platform: &str, outcome: &str) -> u64 {
        self.webhook_requests.get(&[platform, outcome])
    }

    /// Text exposition, with the queue gauges sampled by the caller.
    pub fn render(&self, queue_depth: usize, queue_capacity: usize) -> String {
        let mut out = String::new();
        self.webhook_requests.render(
            &mut out,
            "prbot_webhook_requests_total",
            "Webhook deliveries by platform and outcome.",
            &["platform", "outcome"],
        );
        self.commands.render(
            &mut out,
            "prbot_commands_total",
            "Executed commands by name and result.",
            &["command", "result"],
        );
        self.jobs.render(
            &mut out,
            "prbot_jobs_total",
            "Processed webhook jobs by result.",
            &["result"],
        );
        let _ = writeln!(out, "# HELP prbot_queue_depth Jobs waiting in the queue.");
        let _ = writeln!(out, "# TYPE prbot_queue_depth gauge");
        let _ = writeln!(out, "prbot_queue_depth {}", queue_depth);
        let _ = writeln!(out, "# HELP prbot_queue_capacity Maximum queued jobs.");
        let _ = writeln!(out, "# TYPE prbot_queue_capacity gauge");
        let _ = writeln!(out, "prbot_queue_capacity {}", queue_capacity);
        let _ = writeln!(
            out,
            "# HELP prbot_rate_limited_total Requests rejected by the rate limiter."
        );
        let _ = writeln!(out, "# TYPE prbot_rate_limited_total counter");
        let _ = writeln!(
            out,
            "prbot_rate_limited_total {}",
            self.rate_limited.load(Ordering::Relaxed)
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_exposition() {
        let metrics = Metrics::new();
        metrics.webhook_request("github", "queued");
        metrics.webhook_request("github", "queued");
        metrics.command("merge", "commented");
        metrics.job("ok");
        metrics.rate_limited();

        let text = metrics.render(3, 100);
        assert!(text.contains("prbot_webhook_requests_total{platform=\"github\",outcome=\"queued\"} 2\n"));
        assert!(text.contains("prbot_commands_total{command=\"merge\",result=\"commented\"} 1\n"));
        assert!(text.contains("prbot_jobs_total{result=\"ok\"} 1\n"));
        assert!(text.contains("prbot_queue_depth 3\n"));
        assert!(text.contains("prbot_queue_capacity 100\n"));
        assert!(text.contains("prbot_rate_limited_total 1\n"));
        assert_eq!(metrics.command_count("merge", "commented"), 1);
        assert_eq!(metrics.command_count("merge", "ok"), 0);
    }

    #[test]
    fn test_label_values_are_escaped() {
        let metrics = Metrics::new();
        metrics.command("we\"ird", "ok");
        assert!(metrics
            .render(0, 1)
            .contains("prbot_commands_total{command=\"we\\\"ird\",result=\"ok\"} 1"));
    }
}
