use miette::Diagnostic;
use thiserror::Error;

/// Runtime error type for pool command execution
#[derive(Error, Debug, Diagnostic)]
pub enum RuntimeError {
    /// The resource has no identity token to derive a pool name from
    #[error("pool name cannot be empty")]
    #[diagnostic(
        code(cstor::runtime::empty_pool_name),
        help("The pool name is derived from metadata.uid. Make sure the CStorPool was created through the API server")
    )]
    EmptyPoolName,

    /// The resource lists no disks
    #[error("disk name(s) cannot be empty")]
    #[diagnostic(
        code(cstor::runtime::empty_disk_list),
        help("Add at least one block device path to spec.disks.diskList")
    )]
    EmptyDiskList,

    /// Command ran and exited non-zero
    #[error("Command '{command}' failed with exit code {exit_code}")]
    #[diagnostic(code(cstor::runtime::command_failed), help("output: {output}"))]
    CommandFailed {
        #[allow(unused)]
        command: String,
        #[allow(unused)]
        exit_code: i32,
        #[allow(unused)]
        output: String,
    },

    /// Command could not be started or waited on
    #[error("Command '{command}' could not be run: {message}")]
    #[diagnostic(
        code(cstor::runtime::command_start_failed),
        help("Verify the pool toolchain is installed and on PATH (see --zpool-bin)")
    )]
    CommandStartFailed {
        #[allow(unused)]
        command: String,
        #[allow(unused)]
        message: String,
    },

    /// Reading the command's stdout failed
    #[error("Failed to read output of '{command}': {message}")]
    #[diagnostic(code(cstor::runtime::output_read_failed))]
    OutputReadFailed {
        #[allow(unused)]
        command: String,
        #[allow(unused)]
        message: String,
    },

    /// Command exceeded its wall-clock bound and was killed
    #[error("Command '{command}' timed out after {timeout_secs}s")]
    #[diagnostic(
        code(cstor::runtime::command_timed_out),
        help("The pool toolchain may be blocked on I/O. Check `dmesg` and the state of the backing disks")
    )]
    CommandTimedOut {
        #[allow(unused)]
        command: String,
        #[allow(unused)]
        timeout_secs: u64,
    },

    /// The named pool does not exist on this node
    #[error("Pool not found: {pool}")]
    #[diagnostic(
        code(cstor::runtime::pool_not_found),
        help("Run `zpool import` to list pools that can be imported")
    )]
    PoolNotFound {
        #[allow(unused)]
        pool: String,
    },

    /// No pool is imported on this node
    #[error("No pool is imported on this node")]
    #[diagnostic(code(cstor::runtime::no_pool_imported), help("Run: zpool list"))]
    NoPoolImported,

    /// One or more disks kept their pool label
    #[error("Unable to clear labels from the disks of the pool: {disks}")]
    #[diagnostic(
        code(cstor::runtime::label_clear_failed),
        help("A stale label can cause the disk to be attached to the wrong pool later. Clear it manually with `zpool labelclear -f <disk>`")
    )]
    LabelClearFailed {
        #[allow(unused)]
        disks: String,
    },

    /// The replication service never became ready within the bound
    #[error("Timed out after {waited_secs}s waiting for {service} to become ready")]
    #[diagnostic(
        code(cstor::runtime::dependency_timeout),
        help("Check that the {service} container is running on this node. Raise --zrepl-timeout-secs if its startup recovery is slow")
    )]
    DependencyTimeout {
        #[allow(unused)]
        service: String,
        #[allow(unused)]
        waited_secs: u64,
    },

    /// Wait aborted by shutdown
    #[error("Operation cancelled")]
    #[diagnostic(code(cstor::runtime::cancelled))]
    Cancelled,
}

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

impl RuntimeError {
    pub fn command_failed(
        command: impl Into<String>,
        exit_code: i32,
        output: impl Into<String>,
    ) -> Self {
        Self::CommandFailed {
            command: command.into(),
            exit_code,
            output: output.into(),
        }
    }

    pub fn command_start_failed(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CommandStartFailed {
            command: command.into(),
            message: message.into(),
        }
    }

    pub fn output_read_failed(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OutputReadFailed {
            command: command.into(),
            message: message.into(),
        }
    }

    pub fn command_timed_out(command: impl Into<String>, timeout_secs: u64) -> Self {
        Self::CommandTimedOut {
            command: command.into(),
            timeout_secs,
        }
    }

    pub fn pool_not_found(pool: impl Into<String>) -> Self {
        Self::PoolNotFound { pool: pool.into() }
    }

    pub fn label_clear_failed(disks: &[String]) -> Self {
        Self::LabelClearFailed {
            disks: disks.join(", "),
        }
    }

    pub fn dependency_timeout(service: impl Into<String>, waited_secs: u64) -> Self {
        Self::DependencyTimeout {
            service: service.into(),
            waited_secs,
        }
    }

    /// Captured tool output, if this error carries any
    pub fn output(&self) -> Option<&str> {
        match self {
            RuntimeError::CommandFailed { output, .. } => Some(output),
            _ => None,
        }
    }

    /// Whether a failed command reported something containing `needle`
    pub fn output_contains(&self, needle: &str) -> bool {
        self.output().is_some_and(|o| o.contains(needle))
    }
}
