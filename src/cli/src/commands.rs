use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use joblens_common::constants::{DEFAULT_JOB_ADDER_FIFO, LAUNCHED_JOB_ID};
use joblens_common::{JobDescriptor, JobTimestamp};
use joblens_daemon::LaunchSpec;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

fn footer_message() -> String {
    format!(
        "Default job channel: {}\nSettings can be overridden with JOBLENS__<SECTION>__<KEY> variables.\n",
        DEFAULT_JOB_ADDER_FIFO
    )
}

#[derive(Parser, Clone, Debug)]
#[clap(
    name = "joblens",
    about = "Registers jobs and the processes that belong to them for monitoring",
    version,
    after_help = footer_message()
)]
pub struct Cli {
    /// YAML or TOML configuration file
    #[clap(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the monitor in the foreground
    Run(RunArgs),

    /// Submit one job to a running monitor
    Submit(SubmitArgs),

    /// Print the resolved configuration as JSON
    Config,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Launch this program and monitor it as job 1. The monitor stops when it exits.
    #[clap(long, value_name = "PROGRAM")]
    pub exec: Option<String>,

    /// Arguments passed to the launched program
    #[clap(long, num_args = 1.., allow_hyphen_values = true, requires = "exec")]
    pub args: Vec<String>,

    /// Kill the launched program after this many seconds
    #[clap(long, value_name = "SECONDS", requires = "exec")]
    pub timeout: Option<u64>,
}

impl RunArgs {
    pub fn launch_spec(&self) -> Option<LaunchSpec> {
        let program = self.exec.as_ref()?;
        let spec = LaunchSpec::new(program.clone(), self.args.clone());
        Some(match self.timeout {
            Some(secs) => spec.with_timeout(Duration::from_secs(secs)),
            None => spec,
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct SubmitArgs {
    #[clap(long)]
    pub job_id: i64,

    /// Process id belonging to the job, repeatable
    #[clap(long = "pid", value_name = "PID", allow_negative_numbers = true)]
    pub pids: Vec<i64>,

    /// Creation time as YYYY-MM-DD HH:MM:SS (UTC). Defaults to now.
    #[clap(long, value_name = "TIME", conflicts_with = "invalid_time")]
    pub create_time: Option<String>,

    /// Send the -1 sentinel instead of a creation time
    #[clap(long)]
    pub invalid_time: bool,

    /// Replace the job if it is already registered
    #[clap(long)]
    pub update: bool,

    /// Job channel to write to instead of the configured one
    #[clap(long, value_name = "PATH")]
    pub fifo: Option<PathBuf>,
}

impl SubmitArgs {
    /// Text that does not parse is still sent so the monitor can report it.
    pub fn to_descriptor(&self, now: DateTime<Utc>) -> JobDescriptor {
        let created_at = if self.invalid_time {
            JobTimestamp::sentinel()
        } else {
            match &self.create_time {
                Some(text) => JobTimestamp::from_wire(Value::String(text.clone())),
                None => JobTimestamp::Valid(now),
            }
        };

        let descriptor = JobDescriptor::new(self.job_id, self.pids.clone(), created_at);
        if self.update {
            descriptor.as_update()
        } else {
            descriptor
        }
    }

    /// Job 1 belongs to the program started by `run --exec`. Whether one is
    /// running is not visible from here, so any plain submission of it warns.
    pub fn launched_job_warning(&self) -> Option<String> {
        (self.job_id == LAUNCHED_JOB_ID && !self.update).then(|| {
            format!(
                "Warning: job {} is the id `run --exec` gives its launched program. \
                 With the default reject policy this submission fails if one is running; \
                 pass --update to replace it.",
                self.job_id
            )
        })
    }
}
