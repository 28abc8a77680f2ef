use anyhow::Result;
use clap::Parser;
use testrail_tools::artifacts::HttpArtifacts;
use testrail_tools::cli::UploadArgs;
use testrail_tools::upload::Uploader;
use testrail_tools::{testrailrc_read, init_logging, HttpClient};

fn main() -> Result<()> {
    init_logging();
    let args = UploadArgs::parse();

    let cmd = args.validate()?;
    let rc = testrailrc_read()?;
    let client = HttpClient::new(&rc)?;
    let artifacts = HttpArtifacts::new(&rc.artifacts)?;

    let uploader = Uploader {
        client:     &client,
        rc:         &rc,
        artifacts:  &artifacts,
    };
    uploader.run(&cmd)?;
    Ok(())
}
