// /////////////////////////////////////////////////////////////////////////////
// picklekv
// /////////////////////////////////////////////////////////////////////////////

//! Opens (creating or converting as needed) the store file named on the
//! command line and exits. This binary exists mainly to exercise
//! [`Store::open`] from the shell — embedders use the library directly.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use picklekv::{infrastructure::logging, Store, StoreConfig};

#[derive(Parser, Debug)]
#[command(name = "picklekv", about = "Open (creating or converting) a picklekv store file")]
struct Args {
    /// Path to the store file.
    path: PathBuf,
}

fn main() -> ExitCode {
    logging::init();
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(1);
        }
    };

    match Store::open(&args.path, StoreConfig::default()) {
        Ok(mut store) => {
            let keys = store.keys().unwrap_or_default();
            info!(path = %args.path.display(), keys = keys.len(), "opened store");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(path = %args.path.display(), error = %e, "failed to open store");
            ExitCode::from(1)
        }
    }
}
