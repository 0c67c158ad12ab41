use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::output::*;
use crate::server::FileServer;

#[derive(Args)]
pub struct ServeArgs {
    /// Directory to serve
    #[arg(long, default_value = "tar_files")]
    pub dir: PathBuf,

    /// Port to bind on 127.0.0.1 (0 picks a free one)
    #[arg(long, default_value_t = 8000)]
    pub port: u16,
}

pub fn run(args: ServeArgs) -> Result<()> {
    let server = FileServer::start(&args.dir, args.port)?;
    action(&format!(
        "Serving {} at {}",
        server.root().display(),
        server.base_url()
    ));
    info("Press Ctrl-C to stop");

    // Foreground until interrupted; the accept loop runs on its own thread.
    loop {
        std::thread::sleep(Duration::from_secs(60));
    }
}
