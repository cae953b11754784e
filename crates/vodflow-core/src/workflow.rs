//! Workflow definition loader.
//!
//! The definition is a YAML document:
//!
//! ```yaml
//! steps:
//!   - type: ABR_TRANSCODE
//!     dependsOn: []
//!   - type: VOD_PACKAGE
//!     dependsOn: [ABR_TRANSCODE]
//! ```
//!
//! It is read from a local path, a `file://` URL or an `http(s)://` URL,
//! validated, and memoized for the lifetime of the loader. Failed loads are
//! not cached: the next caller tries again.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use url::Url;

use crate::domain::{Task, TaskType, validate_template};
use crate::error::WorkflowError;

/// Where the workflow definition lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowSource {
    File(PathBuf),
    Http(Url),
}

impl FromStr for WorkflowSource {
    type Err = WorkflowError;

    fn from_str(location: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| WorkflowError::InvalidLocation {
            location: location.to_string(),
            reason,
        };

        match Url::parse(location) {
            Ok(url) => match url.scheme() {
                "file" => url
                    .to_file_path()
                    .map(WorkflowSource::File)
                    .map_err(|()| invalid("not a local file path".to_string())),
                "http" | "https" => Ok(WorkflowSource::Http(url)),
                other => Err(WorkflowError::UnsupportedScheme(other.to_string())),
            },
            Err(url::ParseError::RelativeUrlWithoutBase) if !location.trim().is_empty() => {
                Ok(WorkflowSource::File(PathBuf::from(location)))
            }
            Err(e) => Err(invalid(e.to_string())),
        }
    }
}

impl fmt::Display for WorkflowSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowSource::File(path) => write!(f, "{}", path.display()),
            WorkflowSource::Http(url) => write!(f, "{url}"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WorkflowDocument {
    #[serde(default)]
    steps: Vec<StepDeclaration>,
}

/// Anything else on a step (`status`, `payload`) is ignored.
#[derive(Debug, Deserialize)]
struct StepDeclaration {
    #[serde(rename = "type")]
    task_type: TaskType,
    #[serde(rename = "dependsOn", default)]
    depends_on: Vec<TaskType>,
}

/// Parse and validate a definition. Every resulting task is `PENDING`.
pub fn parse_workflow(yaml: &str) -> Result<Vec<Task>, WorkflowError> {
    let document: WorkflowDocument = serde_yaml::from_str(yaml)?;
    let tasks: Vec<Task> = document
        .steps
        .into_iter()
        .map(|step| Task::pending(step.task_type, step.depends_on))
        .collect();
    validate_template(&tasks)?;
    Ok(tasks)
}

/// Read, parse and validate without memoizing.
pub async fn load_workflow(
    source: &WorkflowSource,
    http: &reqwest::Client,
) -> Result<Vec<Task>, WorkflowError> {
    let raw = match source {
        WorkflowSource::File(path) => {
            debug!(path = %path.display(), "loading workflow definition from file");
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| WorkflowError::Read {
                    path: path.clone(),
                    source,
                })?
        }
        WorkflowSource::Http(url) => {
            debug!(%url, "fetching workflow definition");
            let response = http.get(url.clone()).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(WorkflowError::HttpStatus {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }
            response.text().await?
        }
    };
    parse_workflow(&raw)
}

/// Loads the task template at most once per loader.
#[derive(Debug)]
pub struct WorkflowLoader {
    source: WorkflowSource,
    http: reqwest::Client,
    tasks: OnceCell<Vec<Task>>,
}

impl WorkflowLoader {
    pub fn new(source: WorkflowSource) -> Self {
        Self::with_client(source, reqwest::Client::new())
    }

    pub fn with_client(source: WorkflowSource, http: reqwest::Client) -> Self {
        Self {
            source,
            http,
            tasks: OnceCell::new(),
        }
    }

    pub fn source(&self) -> &WorkflowSource {
        &self.source
    }

    /// The memoized template. Concurrent first callers share one load.
    pub async fn get_tasks(&self) -> Result<&[Task], WorkflowError> {
        let tasks = self
            .tasks
            .get_or_try_init(|| async {
                let tasks = load_workflow(&self.source, &self.http).await?;
                info!(
                    source = %self.source,
                    steps = tasks.len(),
                    "workflow definition loaded"
                );
                Ok::<_, WorkflowError>(tasks)
            })
            .await?;
        Ok(tasks.as_slice())
    }
}
