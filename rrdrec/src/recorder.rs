//! Recorder lifecycle: setup, sampling, shutdown.
//!
//! [`Recorder::setup`] creates (or reopens) one file per configured
//! database and builds its sampler. A database that fails to set up is
//! logged and skipped; the others keep recording.
//!
//! Event-driven samplers are fed through [`Recorder::on_value_changed`] on
//! the caller's thread. Polling samplers each get their own tokio task
//! once [`Recorder::start`] is called and stop when the recorder's
//! [`CancellationToken`] is cancelled.
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use rrdrec::config::RecorderConfig;
//! # use rrdrec::recorder::Recorder;
//! # use rrdrec::sampler::SensorState;
//! # use tokio_util::sync::CancellationToken;
//! # async fn example(sensors: Arc<dyn SensorState>) -> rrdrec::Result<()> {
//! let config = RecorderConfig::from_file("rrdrec.json")?;
//! let mut recorder = Recorder::setup(&config);
//! recorder.start(sensors, CancellationToken::new());
//! recorder.on_value_changed("binary_sensor.front_door", "open", 1_700_000_000);
//! recorder.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::{DatabaseConfig, RecorderConfig, Strategy};
use crate::error::Result;
use crate::sampler::{Bindings, EventDriven, Polling, Sampler, SensorState, Trigger, UpdateStrategy, polling};
use crate::store::Store;

/// Owns every sampler of a configuration.
#[derive(Debug)]
pub struct Recorder {
    store: Store,
    event: Vec<Sampler>,
    idle: Vec<Sampler>,
    tasks: Vec<JoinHandle<Sampler>>,
    failed: Vec<String>,
    token: CancellationToken,
}

impl Recorder {
    /// Creates or reopens every configured database.
    pub fn setup(config: &RecorderConfig) -> Self {
        let store = Store::new(&config.path);
        let mut event = Vec::new();
        let mut idle = Vec::new();
        let mut failed = Vec::new();

        for db_config in &config.databases {
            let strategy = config.strategy_for(db_config);
            match setup_database(&store, db_config, strategy, config.tolerance) {
                Ok(sampler) => {
                    info!(
                        database = %db_config.name,
                        strategy = sampler.strategy(),
                        bindings = sampler.bindings().len(),
                        "database ready"
                    );
                    match strategy {
                        Strategy::Event => event.push(sampler),
                        Strategy::Polling => idle.push(sampler),
                    }
                }
                Err(e) => {
                    error!(database = %db_config.name, error = %e, "failed to set up database");
                    failed.push(db_config.name.clone());
                }
            }
        }

        Self {
            store,
            event,
            idle,
            tasks: Vec::new(),
            failed,
            token: CancellationToken::new(),
        }
    }

    /// Returns the store holding the database files.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Names of databases that failed to set up.
    pub fn failed(&self) -> &[String] {
        &self.failed
    }

    /// Names of databases being recorded, event-driven first.
    pub fn databases(&self) -> Vec<String> {
        self.event
            .iter()
            .chain(&self.idle)
            .map(|sampler| sampler.database().name.clone())
            .collect()
    }

    /// Number of running polling tasks.
    pub fn running(&self) -> usize {
        self.tasks.len()
    }

    /// Feeds a value-changed notification to every event-driven sampler.
    ///
    /// Returns how many databases committed a point.
    pub fn on_value_changed(&mut self, source_id: &str, value: &str, timestamp: u64) -> usize {
        let trigger = Trigger::ValueChanged {
            source_id: source_id.to_string(),
            value: value.to_string(),
            timestamp,
        };
        self.event
            .iter_mut()
            .filter(|sampler| sampler.bindings().is_bound(source_id))
            .filter_map(|sampler| sampler.handle(&trigger))
            .count()
    }

    /// Spawns one polling task per polling database.
    ///
    /// Must be called from within a tokio runtime. Tasks stop when `token`
    /// is cancelled or [`Recorder::shutdown`] is called.
    pub fn start(&mut self, sensors: Arc<dyn SensorState>, token: CancellationToken) {
        self.token = token;
        for sampler in self.idle.drain(..) {
            debug!(database = %sampler.database().name, "spawning polling task");
            self.tasks.push(tokio::spawn(polling::run(
                sampler,
                Arc::clone(&sensors),
                self.token.clone(),
            )));
        }
    }

    /// Stops every polling task and flushes every file.
    pub async fn shutdown(self) {
        self.token.cancel();

        let mut samplers = self.event;
        samplers.extend(self.idle);
        for task in self.tasks {
            match task.await {
                Ok(sampler) => samplers.push(sampler),
                Err(e) => error!(error = %e, "polling task failed"),
            }
        }

        for sampler in &samplers {
            if let Err(e) = sampler.rrd().sync() {
                error!(database = %sampler.database().name, error = %e, "failed to flush database");
            }
        }
        info!(databases = samplers.len(), "recorder stopped");
    }
}

fn setup_database(
    store: &Store,
    db_config: &DatabaseConfig,
    strategy: Strategy,
    tolerance: f64,
) -> Result<Sampler> {
    let db = db_config.database()?;
    store.create(&db)?;
    let rrd = store.open(&db)?;
    let bindings = Bindings::new(&db, db_config.bindings());
    let strategy: Box<dyn UpdateStrategy> = match strategy {
        Strategy::Event => Box::new(EventDriven::new(tolerance)),
        Strategy::Polling => Box::new(Polling),
    };
    Ok(Sampler::new(rrd, bindings, strategy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::tempdir;

    fn config(dir: &std::path::Path) -> RecorderConfig {
        let json = format!(
            r#"{{
                "path": "{}",
                "databases": [
                    {{
                        "name": "doors",
                        "step": 1,
                        "strategy": "event",
                        "data_sources": [
                            {{ "sensor": "binary_sensor.front", "name": "front", "cf": "GAUGE", "heartbeat": "1h" }}
                        ],
                        "round_robin_archives": [{{ "cf": "LAST", "steps": 1, "rows": 100 }}]
                    }},
                    {{
                        "name": "climate",
                        "step": 1,
                        "data_sources": [
                            {{ "sensor": "sensor.temp", "name": "temp", "cf": "GAUGE", "heartbeat": 10 }}
                        ],
                        "round_robin_archives": [{{ "cf": "AVERAGE", "steps": 1, "rows": 100 }}]
                    }},
                    {{
                        "name": "bad/name",
                        "data_sources": [
                            {{ "sensor": "sensor.x", "name": "x", "cf": "GAUGE", "heartbeat": 10 }}
                        ],
                        "round_robin_archives": [{{ "cf": "AVERAGE", "steps": 1, "rows": 10 }}]
                    }}
                ]
            }}"#,
            dir.display()
        );
        RecorderConfig::from_json_str(&json).unwrap()
    }

    struct Sensors(HashMap<String, String>);

    impl SensorState for Sensors {
        fn current_value(&self, source_id: &str) -> Option<String> {
            self.0.get(source_id).cloned()
        }
    }

    #[test]
    fn test_setup_contains_failures() {
        let dir = tempdir().unwrap();
        let recorder = Recorder::setup(&config(dir.path()));

        assert_eq!(recorder.failed(), &["bad/name".to_string()]);
        assert_eq!(recorder.databases(), vec!["doors", "climate"]);
        assert!(recorder.store().exists("doors"));
        assert!(recorder.store().exists("climate"));
    }

    #[test]
    fn test_setup_reopens_existing_files() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        drop(Recorder::setup(&config));

        let recorder = Recorder::setup(&config);
        assert_eq!(recorder.databases().len(), 2);
    }

    #[test]
    fn test_value_changed_reaches_event_databases() {
        let dir = tempdir().unwrap();
        let mut recorder = Recorder::setup(&config(dir.path()));
        let now = crate::store::unix_now();

        assert_eq!(recorder.on_value_changed("binary_sensor.front", "open", now + 5), 1);
        assert_eq!(recorder.on_value_changed("sensor.temp", "20", now + 6), 0);
        assert_eq!(recorder.on_value_changed("binary_sensor.front", "garbage", now + 7), 0);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        let mut recorder = Recorder::setup(&config);
        let start = crate::store::unix_now();

        let mut values = HashMap::new();
        values.insert("sensor.temp".to_string(), "20.5".to_string());
        recorder.start(Arc::new(Sensors(values)), CancellationToken::new());
        assert_eq!(recorder.running(), 1);

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        recorder.shutdown().await;

        let store = Store::new(dir.path());
        let db = config.databases[1].database().unwrap();
        let rrd = store.open(&db).unwrap();
        assert!(rrd.last_update() > start);
    }
}
