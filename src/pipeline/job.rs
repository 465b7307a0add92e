use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Rendering,
    Analyzing,
    Succeeded,
    Partial,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Partial | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Rendering => "rendering",
            JobStatus::Analyzing => "analyzing",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Partial => "partial",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of one corpus entry. Only the orchestrator drives it, through the
/// transition methods; once terminal it never changes again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageJob {
    index: usize,
    url: String,
    attempt_count: u32,
    status: JobStatus,
    failure_reason: Option<String>,
}

impl PageJob {
    pub fn new(index: usize, url: impl Into<String>) -> Self {
        Self {
            index,
            url: url.into(),
            attempt_count: 0,
            status: JobStatus::Pending,
            failure_reason: None,
        }
    }

    /// Position in the input list
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    fn transition(&mut self, allowed_from: &[JobStatus], to: JobStatus) -> Result<()> {
        if !allowed_from.contains(&self.status) {
            return Err(Error::StateError(format!(
                "job {} ({}) cannot move from {} to {}",
                self.index, self.url, self.status, to
            )));
        }
        self.status = to;
        Ok(())
    }

    /// Begin a render attempt. Also used for retries.
    pub fn start_render(&mut self) -> Result<()> {
        self.transition(&[JobStatus::Pending, JobStatus::Rendering], JobStatus::Rendering)?;
        self.attempt_count += 1;
        Ok(())
    }

    pub fn start_analysis(&mut self) -> Result<()> {
        self.transition(&[JobStatus::Rendering], JobStatus::Analyzing)
    }

    pub fn succeed(&mut self) -> Result<()> {
        self.transition(&[JobStatus::Analyzing], JobStatus::Succeeded)
    }

    /// Render worked but at least one analysis stage did not.
    pub fn partial(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(&[JobStatus::Analyzing], JobStatus::Partial)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(
            &[JobStatus::Pending, JobStatus::Rendering, JobStatus::Analyzing],
            JobStatus::Failed,
        )?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let mut job = PageJob::new(0, "http://a.test/");
        job.start_render().unwrap();
        job.start_render().unwrap();
        assert_eq!(job.attempt_count(), 2);
        job.start_analysis().unwrap();
        job.succeed().unwrap();
        assert!(job.status().is_terminal());
        assert_eq!(job.failure_reason(), None);
    }

    #[test]
    fn terminal_states_are_final() {
        let mut job = PageJob::new(1, "http://a.test/");
        job.fail("malformed URL").unwrap();
        assert!(matches!(job.start_render(), Err(Error::StateError(_))));
        assert!(job.fail("again").is_err());
        assert_eq!(job.failure_reason(), Some("malformed URL"));
        assert_eq!(job.status(), JobStatus::Failed);
    }

    #[test]
    fn analysis_requires_a_render() {
        let mut job = PageJob::new(2, "http://a.test/");
        assert!(job.start_analysis().is_err());
        assert!(job.partial("nope").is_err());
        assert_eq!(job.status(), JobStatus::Pending);
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&JobStatus::Partial).unwrap(), "\"partial\"");
        assert_eq!(JobStatus::Succeeded.to_string(), "succeeded");
    }
}
