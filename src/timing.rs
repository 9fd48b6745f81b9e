use std::{
    fs::OpenOptions,
    path::Path,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Wall-clock time of the epochs run so far.
#[derive(Debug, Default)]
pub struct EpochTimer {
    started: Option<Instant>,
    total: Duration,
    epochs: usize,
}

impl EpochTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    /// Close the epoch opened by [`Self::start`] and return its duration.
    pub fn stop(&mut self) -> Duration {
        let elapsed = self
            .started
            .take()
            .map(|started| started.elapsed())
            .unwrap_or_default();
        self.record(elapsed);
        elapsed
    }

    pub fn record(&mut self, elapsed: Duration) {
        self.total += elapsed;
        self.epochs += 1;
    }

    pub fn epochs(&self) -> usize {
        self.epochs
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn average(&self) -> Option<Duration> {
        u32::try_from(self.epochs)
            .ok()
            .filter(|&epochs| epochs > 0)
            .map(|epochs| self.total / epochs)
    }
}

/// One line of a timing log: `<num_hidden> <average_epoch_seconds>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingRecord {
    pub num_hidden: usize,
    pub average_epoch_seconds: f64,
}

impl TimingRecord {
    pub fn new(num_hidden: usize, average_epoch: Duration) -> Self {
        Self {
            num_hidden,
            average_epoch_seconds: average_epoch.as_secs_f64(),
        }
    }

    /// Append this record to `path`, creating the file if needed.
    pub fn append_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b' ')
            .has_headers(false)
            .from_writer(file);
        writer.serialize(self)?;
        writer.flush()?;
        log::info!(
            "appended timing record ({} hidden, {:.6}s/epoch) to {}",
            self.num_hidden,
            self.average_epoch_seconds,
            path.as_ref().display()
        );
        Ok(())
    }

    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<Self>> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b' ')
            .has_headers(false)
            .from_path(path)?;
        let records = reader
            .deserialize()
            .collect::<std::result::Result<Vec<Self>, _>>()?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::{env, fs, process};

    #[test]
    fn average_of_recorded_epochs() {
        let mut timer = EpochTimer::new();
        assert_eq!(timer.average(), None);
        timer.record(Duration::from_millis(100));
        timer.record(Duration::from_millis(300));
        assert_eq!(timer.epochs(), 2);
        assert_eq!(timer.total(), Duration::from_millis(400));
        assert_eq!(timer.average(), Some(Duration::from_millis(200)));
    }

    #[test]
    fn stop_without_start_counts_an_empty_epoch() {
        let mut timer = EpochTimer::new();
        assert_eq!(timer.stop(), Duration::ZERO);
        timer.start();
        timer.stop();
        assert_eq!(timer.epochs(), 2);
    }

    #[test]
    fn records_are_appended() {
        let path = env::temp_dir().join(format!("sgd-net-timing-{}.dat", process::id()));
        let _ = fs::remove_file(&path);

        TimingRecord::new(16, Duration::from_millis(250))
            .append_to(&path)
            .unwrap();
        TimingRecord::new(32, Duration::from_millis(500))
            .append_to(&path)
            .unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "16 0.25\n32 0.5\n");
        assert_eq!(
            TimingRecord::read_all(&path).unwrap(),
            vec![
                TimingRecord {
                    num_hidden: 16,
                    average_epoch_seconds: 0.25
                },
                TimingRecord {
                    num_hidden: 32,
                    average_epoch_seconds: 0.5
                },
            ]
        );
        fs::remove_file(&path).unwrap();
    }
}
