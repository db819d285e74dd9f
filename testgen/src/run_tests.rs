//! Batch test execution: one run of the test command per file, concurrently.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use anyhow::Result;
use tracing::{debug, info, instrument};

use crate::validate::{CodeValidator, ValidationOutcome};

/// Outcome for one file of a batch.
#[derive(Debug)]
pub struct FileRun {
    pub file: PathBuf,
    pub outcome: Result<ValidationOutcome>,
}

impl FileRun {
    pub fn passed(&self) -> bool {
        matches!(&self.outcome, Ok(outcome) if outcome.passed())
    }
}

#[derive(Debug)]
pub struct BatchReport {
    /// One entry per input file, in input order.
    pub runs: Vec<FileRun>,
}

impl BatchReport {
    pub fn all_passed(&self) -> bool {
        self.runs.iter().all(FileRun::passed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &FileRun> {
        self.runs.iter().filter(|run| !run.passed())
    }
}

/// Worker count used when the caller does not choose one.
pub fn default_jobs() -> NonZeroUsize {
    thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
}

/// Run `validator` once per file on at most `jobs` threads.
///
/// Each run is independent; a failure or error for one file never stops the
/// others.
#[instrument(skip_all, fields(files = files.len(), jobs = jobs.get()))]
pub fn run_batch<V: CodeValidator + Sync + ?Sized>(
    validator: &V,
    files: &[PathBuf],
    jobs: NonZeroUsize,
) -> BatchReport {
    let next = AtomicUsize::new(0);
    let slots: Mutex<Vec<Option<FileRun>>> =
        Mutex::new(std::iter::repeat_with(|| None).take(files.len()).collect());
    let workers = jobs.get().min(files.len());

    thread::scope(|scope| {
        for worker in 0..workers {
            let next = &next;
            let slots = &slots;
            scope.spawn(move || {
                loop {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    let Some(file) = files.get(index) else {
                        break;
                    };
                    debug!(worker, file = %file.display(), "running tests");
                    let outcome = validator.validate(file);
                    let run = FileRun {
                        file: file.clone(),
                        outcome,
                    };
                    let mut slots = slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                    slots[index] = Some(run);
                }
            });
        }
    });

    let runs: Vec<FileRun> = slots
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .into_iter()
        .flatten()
        .collect();
    let report = BatchReport { runs };
    info!(
        passed = report.runs.iter().filter(|run| run.passed()).count(),
        total = report.runs.len(),
        "batch finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedValidator;
    use std::path::Path;
    use std::time::{Duration, Instant};

    struct SlowValidator {
        delay: Duration,
    }

    impl CodeValidator for SlowValidator {
        fn name(&self) -> &str {
            "tests"
        }

        fn validate(&self, file: &Path) -> Result<ValidationOutcome> {
            thread::sleep(self.delay);
            if file.to_string_lossy().contains("bad") {
                return Ok(ValidationOutcome::Failed {
                    diagnostics: Vec::new(),
                    output: format!("{} failed", file.display()),
                });
            }
            if file.to_string_lossy().contains("error") {
                anyhow::bail!("spawn failed for {}", file.display());
            }
            Ok(ValidationOutcome::Passed)
        }
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn results_keep_input_order() {
        let validator = SlowValidator {
            delay: Duration::from_millis(10),
        };
        let files = paths(&["a.test.ts", "bad.test.ts", "c.test.ts", "error.test.ts"]);
        let jobs = NonZeroUsize::new(3).expect("non-zero");
        let report = run_batch(&validator, &files, jobs);

        let order: Vec<&Path> = report.runs.iter().map(|run| run.file.as_path()).collect();
        assert_eq!(order, files.iter().map(PathBuf::as_path).collect::<Vec<_>>());
        let passed: Vec<bool> = report.runs.iter().map(FileRun::passed).collect();
        assert_eq!(passed, vec![true, false, true, false]);
        assert!(report.runs[3].outcome.is_err());
        assert!(!report.all_passed());
        assert_eq!(report.failed().count(), 2);
    }

    #[test]
    fn files_run_concurrently() {
        let validator = SlowValidator {
            delay: Duration::from_millis(200),
        };
        let files = paths(&["a.ts", "b.ts", "c.ts", "d.ts"]);
        let started = Instant::now();
        let report = run_batch(&validator, &files, NonZeroUsize::new(4).expect("non-zero"));
        assert!(report.all_passed());
        assert!(started.elapsed() < Duration::from_millis(700));
    }

    #[test]
    fn empty_batch_passes() {
        let validator = ScriptedValidator::new("tests", Vec::<ValidationOutcome>::new());
        let report = run_batch(&validator, &[], default_jobs());
        assert!(report.runs.is_empty());
        assert!(report.all_passed());
    }
}
