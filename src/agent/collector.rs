//! Sampling host and process statistics into the agent-side repository.

use sysinfo::System;

use crate::{
    model::{Metric, MetricError},
    prelude::*,
    usecase::MetricsUseCase,
};


/// Collects one batch of gauges per tick and bumps the `PollCount` counter.
///
/// All writes go through the use-case, so the counter accumulates across
/// ticks while every gauge simply holds its latest sample.
pub(crate) struct Collector {
    metrics: MetricsUseCase,
    system: System,
    pid: Option<sysinfo::Pid>,
}

impl Collector {
    pub(crate) fn new(metrics: MetricsUseCase) -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("Cannot determine own PID, process gauges disabled: {e}");
                None
            }
        };

        Self {
            metrics,
            system: System::new(),
            pid,
        }
    }

    pub(crate) async fn collect(&mut self) -> Result<(), MetricError> {
        self.system.refresh_memory();
        self.system.refresh_cpu_usage();

        let sys = &self.system;
        let load = System::load_average();
        let mut gauges = vec![
            ("TotalMemory", sys.total_memory() as f64),
            ("FreeMemory", sys.free_memory() as f64),
            ("AvailableMemory", sys.available_memory() as f64),
            ("UsedMemory", sys.used_memory() as f64),
            ("TotalSwap", sys.total_swap() as f64),
            ("FreeSwap", sys.free_swap() as f64),
            ("UsedSwap", sys.used_swap() as f64),
            ("CPUutilization1", sys.global_cpu_info().cpu_usage() as f64),
            ("NumCPU", sys.cpus().len() as f64),
            ("LoadAverage1", load.one),
            ("LoadAverage5", load.five),
            ("LoadAverage15", load.fifteen),
            ("Uptime", System::uptime() as f64),
            ("BootTime", System::boot_time() as f64),
            ("RandomValue", rand::random::<f64>()),
        ];

        if let Some(pid) = self.pid {
            self.system.refresh_process(pid);
            if let Some(process) = self.system.process(pid) {
                let disk = process.disk_usage();
                gauges.extend([
                    ("ProcessMemory", process.memory() as f64),
                    ("ProcessVirtualMemory", process.virtual_memory() as f64),
                    ("ProcessCPUutilization", process.cpu_usage() as f64),
                    ("ProcessRunTime", process.run_time() as f64),
                    ("ProcessStartTime", process.start_time() as f64),
                    ("ProcessDiskReadBytes", disk.total_read_bytes as f64),
                    ("ProcessDiskWrittenBytes", disk.total_written_bytes as f64),
                ]);
            }
        }

        for (id, value) in gauges {
            self.metrics.update_metric(&Metric::gauge(id, value)).await?;
        }
        self.metrics.update_metric(&Metric::counter("PollCount", 1)).await?;

        trace!("Collected one round of samples");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{model::MetricKind, store::MemoryRepo};
    use super::*;

    #[tokio::test]
    async fn collect_samples_expected_metrics() {
        let metrics = MetricsUseCase::new(Arc::new(MemoryRepo::new()));
        let mut collector = Collector::new(metrics.clone());
        collector.collect().await.unwrap();

        let mut all = metrics.all_metrics(MetricKind::Gauge).await.unwrap();
        all.extend(metrics.all_metrics(MetricKind::Counter).await.unwrap());
        let find = |id: &str| all.iter().find(|m| m.id == id);

        for id in ["TotalMemory", "FreeMemory", "CPUutilization1", "RandomValue"] {
            let metric = find(id).unwrap_or_else(|| panic!("missing gauge {id}"));
            assert_eq!(metric.kind, MetricKind::Gauge);
            assert!(metric.value.is_some());
        }

        let poll_count = find("PollCount").unwrap();
        assert_eq!(poll_count.kind, MetricKind::Counter);
        assert_eq!(poll_count.delta, Some(1));
    }

    #[tokio::test]
    async fn poll_count_accumulates_across_ticks() {
        let metrics = MetricsUseCase::new(Arc::new(MemoryRepo::new()));
        let mut collector = Collector::new(metrics.clone());
        for _ in 0..3 {
            collector.collect().await.unwrap();
        }

        let stored = metrics.get_metric(MetricKind::Counter, "PollCount").await.unwrap();
        assert_eq!(stored.delta, Some(3));
    }

    #[tokio::test]
    async fn random_value_is_in_unit_interval() {
        let metrics = MetricsUseCase::new(Arc::new(MemoryRepo::new()));
        let mut collector = Collector::new(metrics.clone());
        collector.collect().await.unwrap();

        let stored = metrics.get_metric(MetricKind::Gauge, "RandomValue").await.unwrap();
        let value = stored.value.unwrap();
        assert!((0.0..1.0).contains(&value));
    }
}
