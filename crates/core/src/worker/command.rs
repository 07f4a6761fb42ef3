//! Worker invocation builder.
//!
//! The tracker's config loader honors overrides positionally: runtime
//! configuration arguments must come before any path argument, or some of
//! them are silently ignored. [`WorkerCommand`] emits arguments as
//!
//! ```text
//! program  leading_args...  config_args...  path_args...  video.source=<in>  video.output_dir=<out>
//! ```
//!
//! regardless of the order callers add them in.

use std::path::{Path, PathBuf};

/// Override key carrying the input video path.
pub const SOURCE_ARG_KEY: &str = "video.source";

/// Override key carrying the per-job output directory.
pub const OUTPUT_DIR_ARG_KEY: &str = "video.output_dir";

/// Prefix marking an override as a path/resource argument.
const PATH_ARG_PREFIX: &str = "video.";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerCommand {
    program: String,
    leading_args: Vec<String>,
    config_args: Vec<String>,
    path_args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Arguments placed directly after the program (e.g. the script name).
    pub fn leading_arg(mut self, arg: impl Into<String>) -> Self {
        self.leading_args.push(arg.into());
        self
    }

    pub fn leading_args<I, S>(self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        args.into_iter().fold(self, Self::leading_arg)
    }

    /// A runtime-configuration override. Path overrides (`video.*`) passed
    /// here are moved behind every config argument.
    pub fn config_arg(mut self, arg: impl Into<String>) -> Self {
        let arg = arg.into();
        if is_path_arg(&arg) {
            tracing::debug!(arg = %arg, "Moving path override behind config arguments");
            self.path_args.push(arg);
        } else {
            self.config_args.push(arg);
        }
        self
    }

    pub fn config_args<I, S>(self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        args.into_iter().fold(self, Self::config_arg)
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Full argument vector for one job, excluding the program.
    pub fn args_for(&self, input: &Path, output_dir: &Path) -> Vec<String> {
        let mut args = Vec::with_capacity(
            self.leading_args.len() + self.config_args.len() + self.path_args.len() + 2,
        );
        args.extend(self.leading_args.iter().cloned());
        args.extend(self.config_args.iter().cloned());
        args.extend(
            self.path_args
                .iter()
                .filter(|a| !overrides_key(a, SOURCE_ARG_KEY) && !overrides_key(a, OUTPUT_DIR_ARG_KEY))
                .cloned(),
        );
        args.push(format!("{SOURCE_ARG_KEY}={}", input.display()));
        args.push(format!("{OUTPUT_DIR_ARG_KEY}={}", output_dir.display()));
        args
    }

    /// A ready-to-spawn command for one job.
    pub fn build(&self, input: &Path, output_dir: &Path) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(self.args_for(input, output_dir));
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

fn is_path_arg(arg: &str) -> bool {
    arg.starts_with(PATH_ARG_PREFIX)
}

fn overrides_key(arg: &str, key: &str) -> bool {
    arg.split_once('=').is_some_and(|(k, _)| k == key)
}
