use clap::Parser;
use color_eyre::Result;

use std::os::unix::net::UnixStream;
use std::sync::Arc;

use graphwire::client::{Client, ClientEvents};
use graphwire::types::TypeRegistry;

#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Args {
    #[clap(long, default_value = "/tmp/graphwire-0.sock")]
    socket: String,

    #[clap(long, default_value = "graphwire-cli", help = "app.name property sent to the core")]
    app_name: String,
}

#[derive(Default)]
struct Listing {
    globals: Vec<(u32, String, u32)>,
}

impl ClientEvents for Listing {
    fn global(&mut self, id: u32, type_uri: &str, version: u32) {
        self.globals.push((id, type_uri.to_string(), version));
    }

    fn error(&mut self, id: u32, res: i32, message: &str) {
        eprintln!("error on object {id}: {res} ({message})");
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let args = Args::parse();

    let stream = UnixStream::connect(&args.socket)?;
    let mut client = Client::new(stream, Arc::new(TypeRegistry::new()));

    client.client_update(&[("app.name", &args.app_name)])?;
    client.get_registry()?;

    let mut listing = Listing::default();
    client.roundtrip(1, &mut listing)?;

    for (id, type_uri, version) in &listing.globals {
        println!("global {id}: {type_uri} v{version}");
    }
    Ok(())
}
