use clap::Parser;
use log::info;
use rtjam_lights::{
    client::{self, RunOptions, SinkKind},
    common::box_error::BoxError,
};
use std::time::Duration;

/// Join a jam session and drive this unit's led strip from the shared musical state
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Settings file, defaults to lights_settings.json
    #[arg(short, long)]
    config: Option<String>,

    /// Session room to join
    #[arg(short, long)]
    room: Option<String>,

    /// Websocket url of the jam server, empty to play alone
    #[arg(short, long)]
    ws_url: Option<String>,

    /// Where frames go
    #[arg(short, long, value_enum, default_value_t = SinkKind::Auto)]
    sink: SinkKind,

    /// Add a module that plays random steps and notes
    #[arg(short, long)]
    demo: bool,

    /// Leave after this many seconds
    #[arg(long)]
    seconds: Option<u64>,
}

fn main() -> Result<(), BoxError> {
    // Turn on the logger, RUST_LOG picks the level
    env_logger::init();

    let args = Args::parse();
    info!("rtjam_lights starting: {:?}", args);
    client::run(RunOptions {
        config_file: args.config,
        room: args.room,
        ws_url: args.ws_url,
        sink: args.sink,
        demo: args.demo,
        run_for: args.seconds.map(Duration::from_secs),
    })?;
    Ok(())
}
