use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};

/// Bake and cache counters. The host gathers `registry` however it exports
/// metrics.
pub struct BakeMetrics {
    pub registry: Registry,
    pub bakes_started_total: IntCounter,
    pub bakes_failed_total: IntCounter,
    pub cells_rendered_total: IntCounter,
    pub cells_failed_total: IntCounter,
    pub cache_hits_total: IntCounter,
    pub inflight_joins_total: IntCounter,
    pub bake_duration_seconds: Histogram,
}

impl BakeMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("octahedral_impostor".into()), None)?;

        macro_rules! reg {
            ($m:expr) => {{
                let m = $m?;
                registry.register(Box::new(m.clone()))?;
                m
            }};
        }

        Ok(Self {
            bakes_started_total: reg!(IntCounter::new(
                "bakes_started_total",
                "Atlas bakes started"
            )),
            bakes_failed_total: reg!(IntCounter::new(
                "bakes_failed_total",
                "Atlas bakes that failed as a whole"
            )),
            cells_rendered_total: reg!(IntCounter::new(
                "cells_rendered_total",
                "Sprites rendered into atlases"
            )),
            cells_failed_total: reg!(IntCounter::new(
                "cells_failed_total",
                "Sprites left blank after a render or read-back failure"
            )),
            cache_hits_total: reg!(IntCounter::new(
                "cache_hits_total",
                "Atlas requests served from the completed cache"
            )),
            inflight_joins_total: reg!(IntCounter::new(
                "inflight_joins_total",
                "Atlas requests attached to a bake already in flight"
            )),
            bake_duration_seconds: reg!(Histogram::with_opts(
                HistogramOpts::new("bake_duration_seconds", "Wall time of a complete bake")
                    .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0])
            )),
            registry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_every_metric_under_the_namespace() {
        let m = BakeMetrics::new().unwrap();
        m.cache_hits_total.inc();
        m.bake_duration_seconds.observe(0.2);
        let names: Vec<String> = m.registry.gather().iter().map(|f| f.get_name().to_owned()).collect();
        assert_eq!(names.len(), 7);
        assert!(names.iter().all(|n| n.starts_with("octahedral_impostor_")));
    }
}
