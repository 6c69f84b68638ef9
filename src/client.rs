//! top level entry point called by main to run a light unit
//!
//! [`run`] loads the settings, builds this unit's replica of the session
//! state, joins the session room and starts the [`FrameScheduler`] on its own
//! high priority thread.  The calling thread then loops: it polls the
//! [`SyncSession`], relays local edits from the module adapters into it, and
//! tells the adapters about every committed change.
//!
//! The frame thread never waits on the network.  If the room goes away the
//! strip keeps animating from local state and the session asks for a fresh
//! snapshot once the websocket thread gets back in.
use log::{debug, error, info, warn};
use simple_error::bail;
use std::{
    thread::sleep,
    time::{Duration, Instant},
};

use crate::{
    common::{box_error::BoxError, config::Config, get_micro_time, get_stamp, stream_time_stat::MicroTimer},
    lights::{
        color_resolver::{ColorPolicy, Scale},
        compositor::LedCompositor,
        frame_scheduler::{FrameScheduler, MAX_FRAME_RATE},
        output_sink::{has_strip, ConsoleSink, NullSink, OutputSink},
    },
    modules::{
        demo_module::DemoModule, drum_grid::DrumGridAdapter, module_adapter::ModuleAdapter,
        note_lights::RemoteNotesLayer,
    },
    state::{session_state::Tonality, state_store::StateStore},
    sync::{
        local_bus::LocalBus,
        session::{SyncSession, SYNC_TOPIC},
        sync_channel::SyncChannel,
        websocket_channel::WebsocketChannel,
    },
};

pub const DEFAULT_CONFIG_FILE: &str = "lights_settings.json";
const STATUS_INTERVAL: u128 = 10_000_000;

/// Where frames go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SinkKind {
    /// the led strip if there is one, otherwise nowhere
    #[default]
    Auto,
    Null,
    Console,
    Strip,
}

/// What the command line can say about a run
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config_file: Option<String>,
    pub room: Option<String>,
    pub ws_url: Option<String>,
    pub sink: SinkKind,
    pub demo: bool,
    /// stop after this long, run until the sink goes away if None
    pub run_for: Option<Duration>,
}

/// Typed settings for one unit
#[derive(Debug, Clone, PartialEq)]
pub struct LightsSettings {
    pub ws_url: String,
    pub room: String,
    pub origin_id: String,
    pub strip_length: usize,
    pub frame_rate: u32,
    /// usec a frame may take to compose
    pub frame_budget_us: u64,
    pub tracks: usize,
    pub steps: usize,
    pub bpm: f64,
    pub debounce_us: u64,
    pub snapshot_timeout_us: u64,
    pub trigger_decay_us: u64,
    pub color_policy: ColorPolicy,
    pub tonality: Tonality,
}

pub fn default_settings() -> json::JsonValue {
    json::object! {
        // empty means play alone on an in-process bus
        "ws_url": "",
        "room": "jam_lights",
        // empty means derive one from the mac address
        "origin_id": "",
        "strip_length": 60,
        "frame_rate": 40,
        // zero means three quarters of a frame tick
        "frame_budget_us": 0,
        "tracks": 8,
        "steps": 16,
        "bpm": 120.0,
        "debounce_ms": 50,
        "snapshot_timeout_ms": 2000,
        "trigger_decay_ms": 600,
        "color_policy": "harmonic",
        "key": 0,
        "scale": "major"
    }
}

impl LightsSettings {
    pub fn load(config: &Config) -> Result<LightsSettings, BoxError> {
        let frame_rate = config.get_u32_value("frame_rate", None)?;
        if frame_rate == 0 || frame_rate > MAX_FRAME_RATE {
            bail!("frame_rate {} outside 1..={}", frame_rate, MAX_FRAME_RATE);
        }
        let strip_length = config.get_u32_value("strip_length", None)? as usize;
        let tracks = config.get_u32_value("tracks", None)? as usize;
        let steps = config.get_u32_value("steps", None)? as usize;
        if strip_length == 0 || tracks == 0 || steps == 0 {
            bail!("strip_length, tracks and steps must all be at least 1");
        }
        let mut frame_budget_us = config.get_u32_value("frame_budget_us", None)? as u64;
        if frame_budget_us == 0 {
            frame_budget_us = 750_000 / frame_rate as u64;
        }
        let key = config.get_u32_value("key", None)?;
        if key > 11 {
            bail!("key {} is not a pitch class 0..=11", key);
        }
        let scale: Scale = config.get_str_value("scale", None)?.parse()?;
        let color_policy: ColorPolicy = config.get_str_value("color_policy", None)?.parse()?;
        let mut origin_id = config.get_str_value("origin_id", None)?;
        if origin_id.is_empty() {
            origin_id = make_origin_id();
        }
        Ok(LightsSettings {
            ws_url: config.get_str_value("ws_url", None)?,
            room: config.get_str_value("room", None)?,
            origin_id,
            strip_length,
            frame_rate,
            frame_budget_us,
            tracks,
            steps,
            bpm: config.get_f64_value("bpm", None)?,
            debounce_us: config.get_u32_value("debounce_ms", None)? as u64 * 1_000,
            snapshot_timeout_us: config.get_u32_value("snapshot_timeout_ms", None)? as u64 * 1_000,
            trigger_decay_us: config.get_u32_value("trigger_decay_ms", None)? as u64 * 1_000,
            color_policy,
            tonality: Tonality { key: key as u8, scale },
        })
    }
}

/// Mac address plus a random tag, so two units on one host never share an id
pub fn make_origin_id() -> String {
    let tag: u16 = rand::random();
    match mac_address::get_mac_address() {
        Ok(Some(mac)) => format!("{}-{:04x}", mac, tag),
        Ok(None) => format!("unit-{:08x}", rand::random::<u32>()),
        Err(e) => {
            warn!("cannot read mac address: {}", e);
            format!("unit-{:08x}", rand::random::<u32>())
        }
    }
}

/// Load the settings file and lay the command line on top of it
fn init_config(options: &RunOptions) -> Result<LightsSettings, BoxError> {
    let filename = options.config_file.as_deref().unwrap_or(DEFAULT_CONFIG_FILE);
    info!("Using config file: {}", filename);
    let mut config = Config::build(filename, default_settings()).map_err(|e| {
        error!("Issue with config file or parameter: {}", e);
        e
    })?;
    if let Some(room) = &options.room {
        config.set_value("room", room.as_str())?;
    }
    if let Some(ws_url) = &options.ws_url {
        config.set_value("ws_url", ws_url.as_str())?;
    }
    let settings = LightsSettings::load(&config)?;
    info!("Config values: {:?}", settings);
    Ok(settings)
}

fn init_sink(kind: SinkKind) -> Result<Box<dyn OutputSink>, BoxError> {
    match kind {
        SinkKind::Null => Ok(Box::new(NullSink::new())),
        SinkKind::Console => Ok(Box::new(ConsoleSink::new())),
        SinkKind::Strip => strip_sink(),
        SinkKind::Auto => {
            if has_strip() {
                strip_sink()
            } else {
                Ok(Box::new(NullSink::new()))
            }
        }
    }
}

#[cfg(feature = "rpi")]
fn strip_sink() -> Result<Box<dyn OutputSink>, BoxError> {
    Ok(Box::new(crate::lights::output_sink::Ws2812Sink::new()?))
}

#[cfg(not(feature = "rpi"))]
fn strip_sink() -> Result<Box<dyn OutputSink>, BoxError> {
    bail!("this build has no led strip support, rebuild with --features rpi")
}

fn init_channel(settings: &LightsSettings) -> Result<Box<dyn SyncChannel>, BoxError> {
    if settings.ws_url.is_empty() {
        info!("no ws_url configured, playing alone");
        Ok(Box::new(LocalBus::new().join()))
    } else {
        Ok(Box::new(WebsocketChannel::connect(&settings.room, &settings.ws_url)?))
    }
}

/// Fresh replica.  Configured color settings go in at timestamp zero so
/// anything the room has already agreed on wins.
fn init_store(settings: &LightsSettings) -> StateStore {
    let store = StateStore::new(
        &settings.origin_id,
        settings.tracks,
        settings.steps,
        settings.trigger_decay_us,
    );
    store.set_color_policy(settings.color_policy, 0, &settings.origin_id);
    store.set_tonality(settings.tonality, 0, &settings.origin_id);
    store
}

/// One layer per adapter that draws, then one for note triggers from
/// modules that live on other units.
fn init_compositor(settings: &LightsSettings, adapters: &[Box<dyn ModuleAdapter>]) -> LedCompositor {
    let mut compositor = LedCompositor::new(settings.strip_length, settings.frame_budget_us);
    let mut claimed = vec![];
    for adapter in adapters.iter() {
        if let Some(layer) = adapter.light_layer() {
            debug!("light layer from {}", adapter.module_id());
            compositor.add_layer(layer);
        }
        if adapter.claims_note_triggers() {
            claimed.push(adapter.module_id().to_string());
        }
    }
    compositor.add_layer(Box::new(RemoteNotesLayer::new(claimed)));
    compositor
}

/// This is the entry point for a light unit.  Returns when `run_for` runs
/// out or the output device goes away.
pub fn run(options: RunOptions) -> Result<(), BoxError> {
    run_with_adapters(options, vec![])
}

/// Same as [`run`], with extra modules plugged in by the caller.  A module on
/// its own thread comes in through a
/// [`ChannelAdapter`](crate::modules::channel_adapter::ChannelAdapter).
pub fn run_with_adapters(options: RunOptions, extra: Vec<Box<dyn ModuleAdapter>>) -> Result<(), BoxError> {
    info!("client - starting run function");
    let settings = init_config(&options)?;

    let store = init_store(&settings);
    let mut adapters: Vec<Box<dyn ModuleAdapter>> = vec![Box::new(DrumGridAdapter::new(
        settings.tracks,
        settings.steps,
        settings.bpm,
    ))];
    if options.demo {
        info!("demo module enabled");
        adapters.push(Box::new(DemoModule::new(settings.tracks, settings.steps)));
    }
    for adapter in extra {
        info!("module {} plugged in", adapter.module_id());
        adapters.push(adapter);
    }

    let compositor = init_compositor(&settings, &adapters);
    let sink = init_sink(options.sink)?;
    let mut scheduler = FrameScheduler::start(store.clone(), compositor, sink, settings.frame_rate)?;
    debug!("client::run - frame scheduler started");

    let channel = init_channel(&settings)?;
    let mut session = SyncSession::new(
        store.clone(),
        channel,
        SYNC_TOPIC,
        settings.debounce_us,
        settings.snapshot_timeout_us,
    );
    debug!("client::run - setup complete, beginning main event loop");

    run_main_loop(&mut session, &mut adapters, &scheduler, options.run_for);

    session.leave();
    scheduler.stop();
    Ok(())
}

fn run_main_loop(
    session: &mut SyncSession,
    adapters: &mut [Box<dyn ModuleAdapter>],
    scheduler: &FrameScheduler,
    run_for: Option<Duration>,
) {
    let started = Instant::now();
    let changes = session.store().subscribe();
    let mut status_timer = MicroTimer::build(get_micro_time(), STATUS_INTERVAL);

    loop {
        session.poll();
        relay_edits(session, adapters);
        for change in changes.try_iter() {
            let state = session.store().snapshot();
            for adapter in adapters.iter_mut() {
                adapter.render(&change, &state);
            }
        }

        let now = get_micro_time();
        if status_timer.expired(now) {
            status_timer.reset(now);
            let stats = scheduler.stats();
            info!(
                "status: {} / {}, revision {}, frames {} emitted {} skipped, {:?}",
                session.status(),
                session.connection_state(),
                session.store().snapshot().pattern.revision(),
                stats.get_frames_emitted(),
                stats.get_frames_skipped(),
                session.counters()
            );
        }
        if !scheduler.is_running() {
            warn!("frame scheduler is gone, leaving the session");
            break;
        }
        if run_for.map_or(false, |limit| started.elapsed() >= limit) {
            break;
        }
        sleep(Duration::from_millis(1));
    }
}

fn relay_edits(session: &mut SyncSession, adapters: &mut [Box<dyn ModuleAdapter>]) {
    for adapter in adapters.iter_mut() {
        for edit in adapter.poll_edits() {
            if let Err(e) = session.handle_edit(edit, get_stamp()) {
                warn!("{}: edit rejected: {}", adapter.module_id(), e);
            }
        }
    }
}

#[cfg(test)]
mod test_client {
    use super::*;
    use crate::modules::{channel_adapter::ChannelAdapter, module_adapter::LocalEdit};
    use crate::state::{note_trigger::NoteTrigger, state_store::StateChange};

    fn options() -> RunOptions {
        RunOptions {
            config_file: Some("rtjam_lights_no_such_file.json".to_string()),
            sink: SinkKind::Null,
            ..Default::default()
        }
    }

    #[test]
    fn defaults_make_sense() {
        let settings = init_config(&options()).unwrap();
        assert_eq!(settings.ws_url, "");
        assert_eq!(settings.room, "jam_lights");
        assert!(!settings.origin_id.is_empty());
        assert_eq!(settings.frame_rate, 40);
        assert_eq!(settings.frame_budget_us, 18_750);
        assert_eq!(settings.debounce_us, 50_000);
        assert_eq!(settings.snapshot_timeout_us, 2_000_000);
        assert_eq!((settings.tracks, settings.steps), (8, 16));
        assert_eq!(settings.color_policy, ColorPolicy::Harmonic);
        assert_eq!(settings.tonality, Tonality::default());
    }

    #[test]
    fn command_line_wins() {
        let mut opts = options();
        opts.room = Some("garage".to_string());
        opts.ws_url = Some("ws://localhost:8080/primus".to_string());
        let settings = init_config(&opts).unwrap();
        assert_eq!(settings.room, "garage");
        assert_eq!(settings.ws_url, "ws://localhost:8080/primus");
    }

    #[test]
    fn bad_settings_are_refused() {
        let mut config = Config::build("rtjam_lights_no_such_file.json", default_settings()).unwrap();
        config.set_value("frame_rate", 500).unwrap();
        assert!(LightsSettings::load(&config).is_err());
        config.set_value("frame_rate", 30).unwrap();
        config.set_value("scale", "lydian-ish").unwrap();
        assert!(LightsSettings::load(&config).is_err());
        config.set_value("scale", "dorian").unwrap();
        config.set_value("key", 12).unwrap();
        assert!(LightsSettings::load(&config).is_err());
        config.set_value("key", 9).unwrap();
        let settings = LightsSettings::load(&config).unwrap();
        assert_eq!(settings.tonality, Tonality { key: 9, scale: Scale::Dorian });
        assert_eq!(settings.frame_budget_us, 25_000);
        assert!(Config::build("../etc/passwd", default_settings()).is_err());
    }

    #[test]
    fn configured_colors_yield_to_the_room() {
        let mut settings = init_config(&options()).unwrap();
        settings.color_policy = ColorPolicy::Spectrum;
        let store = init_store(&settings);
        assert_eq!(store.snapshot().color_policy.value, ColorPolicy::Spectrum);
        assert!(store.set_color_policy(ColorPolicy::Chromatic, 1, "someone_else").applied());
    }

    #[test]
    fn origin_ids_differ() {
        assert_ne!(make_origin_id(), make_origin_id());
    }

    #[test]
    fn demo_runs_alone() {
        let mut opts = options();
        opts.demo = true;
        opts.run_for = Some(Duration::from_millis(300));
        assert!(run(opts).is_ok());
    }

    #[test]
    fn notes_from_other_units_light_up() {
        let settings = init_config(&options()).unwrap();
        let adapters: Vec<Box<dyn ModuleAdapter>> = vec![Box::new(DrumGridAdapter::new(
            settings.tracks,
            settings.steps,
            settings.bpm,
        ))];
        let mut compositor = init_compositor(&settings, &adapters);
        let store = init_store(&settings);
        let keys = NoteTrigger {
            module_id: "keys".to_string(),
            note: 108,
            velocity: 127,
            timestamp: 5,
            origin_id: "another_unit".to_string(),
        };
        store.record_note_trigger_at(&keys, 1_000);
        let frame = compositor.compose(&store.snapshot(), 1_000).unwrap();
        let top = frame.pixel(settings.strip_length - 1).unwrap();
        assert_eq!(top, store.snapshot().note_color(108));
    }

    #[test]
    fn plugged_in_module_reaches_the_session() {
        let (adapter, edits, changes) = ChannelAdapter::new("keys");
        let mut opts = options();
        opts.run_for = Some(Duration::from_millis(200));
        edits
            .send(LocalEdit::NoteTrigger {
                module_id: "keys".to_string(),
                note: 60,
                velocity: 90,
            })
            .unwrap();
        assert!(run_with_adapters(opts, vec![Box::new(adapter.with_note_lights())]).is_ok());
        let heard: Vec<StateChange> = changes.try_iter().collect();
        assert!(heard.contains(&StateChange::NoteTrigger {
            module_id: "keys".to_string(),
            note: 60,
            velocity: 90
        }));
    }

    #[cfg(not(feature = "rpi"))]
    #[test]
    fn strip_needs_the_rpi_build() {
        assert!(init_sink(SinkKind::Strip).is_err());
        assert!(init_sink(SinkKind::Auto).is_ok());
    }
}
