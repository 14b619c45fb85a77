use crate::error::Result;
use chrono::{Local, NaiveDate};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Append-only `<experiment>.datalog` sidecar with one `subject: date` line
/// per run, used to number output files so reruns never overwrite data.
///
/// Read-then-append with no locking; one experimenter per machine.
#[derive(Debug, Clone)]
pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_experiment(dir: &Path, experiment_name: &str) -> Self {
        Self::new(dir.join(format!("{experiment_name}.datalog")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of earlier runs recorded for `subject`. A missing sidecar is an
    /// empty history.
    pub fn prior_runs(&self, subject: &str) -> Result<usize> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        Ok(contents
            .lines()
            .filter_map(|line| line.rsplit_once(": "))
            .filter(|(name, _)| *name == subject)
            .count())
    }

    pub fn record(&self, subject: &str, date: NaiveDate) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{subject}: {}", date.format("%Y-%m-%d"))?;
        Ok(())
    }

    /// `subject_N.ext` with N one past the subject's prior runs, recording
    /// this run dated `date`.
    pub fn next_output_filename_on(
        &self,
        subject: &str,
        extension: &str,
        date: NaiveDate,
    ) -> Result<String> {
        let run = self.prior_runs(subject)? + 1;
        self.record(subject, date)?;
        let name = format!("{subject}_{run}.{extension}");
        tracing::debug!(sidecar = %self.path.display(), %name, "output file chosen");
        Ok(name)
    }

    pub fn next_output_filename(&self, subject: &str, extension: &str) -> Result<String> {
        self.next_output_filename_on(subject, extension, Local::now().date_naive())
    }
}

/// Picks a fresh log path in `dir` for `subject`, recording the run in the
/// experiment's sidecar.
pub fn output_filename(
    dir: &Path,
    subject: &str,
    experiment_name: &str,
    extension: &str,
) -> Result<PathBuf> {
    let name = RunLog::for_experiment(dir, experiment_name)
        .next_output_filename(subject, extension)?;
    Ok(dir.join(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExperimentError;
    use tempfile::TempDir;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    #[test]
    fn no_history_starts_at_one() {
        let dir = TempDir::new().unwrap();
        let log = RunLog::for_experiment(dir.path(), "expt");
        assert_eq!(log.prior_runs("subjectA").unwrap(), 0);
        assert_eq!(
            log.next_output_filename_on("subjectA", "csv", day()).unwrap(),
            "subjectA_1.csv"
        );
    }

    #[test]
    fn counts_prior_runs_of_subject() {
        let dir = TempDir::new().unwrap();
        let log = RunLog::for_experiment(dir.path(), "expt");
        log.record("subjectA", day()).unwrap();
        log.record("subjectB", day()).unwrap();
        log.record("subjectA", day()).unwrap();
        assert_eq!(
            log.next_output_filename_on("subjectA", "csv", day()).unwrap(),
            "subjectA_3.csv"
        );

        let contents = fs::read_to_string(log.path()).unwrap();
        assert_eq!(contents.lines().count(), 4);
        assert_eq!(contents.lines().last(), Some("subjectA: 2024-03-01"));
    }

    #[test]
    fn subject_names_match_exactly() {
        let dir = TempDir::new().unwrap();
        let log = RunLog::for_experiment(dir.path(), "expt");
        log.record("s1", day()).unwrap();
        log.record("s10", day()).unwrap();
        assert_eq!(log.prior_runs("s1").unwrap(), 1);
    }

    #[test]
    fn sidecar_write_failure_propagates() {
        let dir = TempDir::new().unwrap();
        let log = RunLog::for_experiment(&dir.path().join("missing"), "expt");
        assert_eq!(log.prior_runs("subjectA").unwrap(), 0);
        assert!(matches!(
            log.record("subjectA", day()),
            Err(ExperimentError::Io(_))
        ));
        assert!(matches!(
            log.next_output_filename_on("subjectA", "csv", day()),
            Err(ExperimentError::Io(_))
        ));
    }

    #[test]
    fn output_path_lands_in_dir() {
        let dir = TempDir::new().unwrap();
        let path = output_filename(dir.path(), "7", "stroop", "tsv").unwrap();
        assert_eq!(path, dir.path().join("7_1.tsv"));
        assert!(dir.path().join("stroop.datalog").exists());
    }
}
