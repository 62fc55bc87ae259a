use std::collections::BTreeMap;

use anyhow::{Context, Result};
use perf_monitor::telemetry::{EventSubscription, PerformanceEvent, PerformanceSnapshot};
use serde::Serialize;

#[derive(Default)]
pub struct RunAggregator {
    snapshot_count: usize,
    last_snapshot: Option<PerformanceSnapshot>,
    peak_cpu_percent: f32,
    min_fps: Option<f32>,
    events_by_kind: BTreeMap<&'static str, usize>,
    events: Vec<PerformanceEvent>,
}

impl RunAggregator {
    pub fn record_snapshot(&mut self, snapshot: PerformanceSnapshot) {
        self.snapshot_count += 1;
        self.peak_cpu_percent = self.peak_cpu_percent.max(snapshot.cpu_percent);
        if snapshot.fps > 0.0 {
            self.min_fps = Some(self.min_fps.map_or(snapshot.fps, |fps| fps.min(snapshot.fps)));
        }
        self.last_snapshot = Some(snapshot);
    }

    pub fn record_event(&mut self, event: PerformanceEvent) {
        *self.events_by_kind.entry(event.kind().as_str()).or_default() += 1;
        self.events.push(event);
    }

    pub fn into_report(self, missed_events: u64) -> RunReport {
        RunReport {
            snapshot_count: self.snapshot_count,
            peak_cpu_percent: self.peak_cpu_percent,
            min_fps: self.min_fps,
            last_snapshot: self.last_snapshot,
            events_by_kind: self.events_by_kind,
            missed_events,
            events: self.events,
        }
    }
}

pub fn drain_events(subscription: &mut EventSubscription, aggregator: &mut RunAggregator) {
    for event in subscription.drain() {
        aggregator.record_event(event);
    }
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub snapshot_count: usize,
    pub peak_cpu_percent: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_fps: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_snapshot: Option<PerformanceSnapshot>,
    pub events_by_kind: BTreeMap<&'static str, usize>,
    pub missed_events: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<PerformanceEvent>,
}

impl RunReport {
    pub fn print_json(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("serializing run report")?;
        println!("{json}");
        Ok(())
    }

    pub fn print_table(&self) {
        println!("Snapshots observed       : {}", self.snapshot_count);
        println!("Peak CPU                 : {:.1}%", self.peak_cpu_percent);
        match self.min_fps {
            Some(fps) => println!("Lowest FPS               : {:.1}", fps),
            None => println!("Lowest FPS               : n/a"),
        }

        if let Some(last) = &self.last_snapshot {
            println!(
                "Last snapshot            : cpu {:.1}% fps {:.1} ({:.2} ms) mem {:.1} MB heap {:.1} MB",
                last.cpu_percent, last.fps, last.avg_frame_ms, last.memory_usage_mb, last.heap_usage_mb
            );
            println!(
                "Battery                  : {}% {:.1}C charging={}",
                last.battery_level, last.battery_temperature_c, last.is_charging
            );
        }

        if self.events_by_kind.is_empty() {
            println!("Events                   : none");
        } else {
            println!("Events (missed {})        :", self.missed_events);
            for (kind, count) in &self.events_by_kind {
                println!("  - {kind}: {count}");
            }
        }

        for event in &self.events {
            match event {
                PerformanceEvent::Anr { duration_ms, stack_trace, .. } => {
                    println!("ANR {duration_ms} ms: {stack_trace}")
                }
                PerformanceEvent::MemoryLeak { label, retained_heap_kb, .. } => {
                    println!("Leak {label}: heap {retained_heap_kb} KB")
                }
                PerformanceEvent::BatteryDrain { level, temperature_c, .. } => {
                    println!("Battery drain to {level}% at {temperature_c:.1}C")
                }
                PerformanceEvent::MetricAlert { metric_name, detail, .. } => {
                    println!("Metric {metric_name}: {detail}")
                }
                PerformanceEvent::Crash { thread_name, message, .. } => {
                    println!("Crash on {thread_name}: {message}")
                }
            }
        }
    }
}
