use anyhow::Result;
use clap::Parser;
use testrail_tools::cli::LifecycleArgs;
use testrail_tools::{lifecycle, testrailrc_read, init_logging, HttpClient};

fn main() -> Result<()> {
    init_logging();
    let args = LifecycleArgs::parse();

    let policy = args.policy()?;
    let rc = testrailrc_read()?;
    let client = HttpClient::new(&rc)?;

    lifecycle::run(&client, rc.project_id, &policy)
}
