use clap::Parser;
use color_eyre::Result;
use std::fs;
use std::os::unix::net::UnixListener;

use graphwire::Server;

#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Args {
    #[clap(long, default_value = "/tmp/graphwire-0.sock")]
    socket: String,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let args = Args::parse();

    // a previous run may have left its socket behind
    let _ = fs::remove_file(&args.socket);
    let listener = UnixListener::bind(&args.socket)?;
    log::info!(target: "graphwire", "listening on {}", args.socket);

    Server::new().start(listener)?;
    Ok(())
}
