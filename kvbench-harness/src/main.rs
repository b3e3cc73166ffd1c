//! The `kvbench` binary.
//!
//! Loads the configuration, runs every configured backend side by side and prints a summary. See
//! [`kvbench_harness::config`] for the available options.

fn main() -> anyhow::Result<()> {
    kvbench_harness::cli::execute()
}
