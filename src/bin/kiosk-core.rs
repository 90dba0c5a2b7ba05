#![warn(unsafe_op_in_unsafe_fn)]
#![warn(clippy::pedantic)]

use clap::Parser;
use eyre::{Result, WrapErr as _};
use futures::{pin_mut, select_biased, FutureExt as _};
use kiosk::{
    admin::{self, AdminState},
    agents::{
        camera::{CameraService, SceneHandle, SimulatedPipeline},
        face::LumaRegionDetector,
        proximity::{DistanceProvider, IioProvider, ProximitySource, ScriptedProvider},
    },
    async_main,
    backend::bridge::BridgeClient,
    cli::Cli,
    config::Config,
    consts::CONFIG_FILE_PATH,
    controller::{Command, Controller, Services},
    dd_incr, dd_timing, logger,
    store::CaptureStore,
};
use std::{path::Path, sync::Arc, time::SystemTime};
use tokio::{signal::ctrl_c, task};
use tokio_util::sync::CancellationToken;

fn main() -> Result<()> {
    async_main(run(Cli::parse()))
}

async fn run(cli: Cli) -> Result<()> {
    logger::init();
    dd_incr!("main.count.global.starting_main_program");
    let t = SystemTime::now();

    let mut config = match &cli.config {
        Some(path) => Config::load(path).await?,
        None if Path::new(CONFIG_FILE_PATH).exists() => {
            Config::load(Path::new(CONFIG_FILE_PATH)).await?
        }
        None => Config::default(),
    };
    if let Some(admin_addr) = cli.admin_addr {
        config.admin_addr = admin_addr;
    }
    config.validate().wrap_err("invalid configuration")?;
    let config = Arc::new(config);

    // The sensor driver must be present before anything else spins up.
    let provider: Box<dyn DistanceProvider> = if cli.simulate_hardware {
        tracing::warn!("running with the simulated distance provider");
        Box::new(ScriptedProvider::new(vec![Some(2000)]))
    } else {
        Box::new(IioProvider::probe().wrap_err("proximity sensor unavailable")?)
    };

    let camera = Arc::new(CameraService::new(
        config.camera.clone(),
        Arc::new(LumaRegionDetector::default()),
        Box::new(SimulatedPipeline::new(&config.camera, SceneHandle::default())),
    ));
    let services = Arc::new(Services {
        config: Arc::clone(&config),
        camera,
        bridge: Arc::new(BridgeClient::new(config.bridge.ws_url.clone())),
        events: kiosk::ui::EventBus::new(),
        store: CaptureStore::new(config.captures_dir.clone()),
    });

    let controller = Controller::new(Arc::clone(&services), cli.oneshot);
    let commands = controller.command_sender();

    let heartbeat = services.events.spawn_heartbeat();

    let proximity_commands = commands.clone();
    let proximity = ProximitySource::new(
        provider,
        config.proximity.threshold_mm,
        config.proximity_debounce(),
        config.proximity.poll_hz,
    )
    .start(move |triggered, distance_mm| {
        proximity_commands.post(Command::Proximity { triggered, distance_mm });
    });

    let admin_shutdown = CancellationToken::new();
    let admin_task = task::spawn(admin::serve(
        config.admin_addr,
        AdminState::new(commands.clone(), services.events.clone()),
        admin_shutdown.clone(),
    ));

    dd_timing!("main.time.global.init_main_program", t);
    let result = {
        let controller = controller.run().fuse();
        let ctrl_c = ctrl_c().fuse();
        pin_mut!(controller);
        pin_mut!(ctrl_c);
        select_biased! {
            result = ctrl_c => {
                tracing::info!("Exiting on Ctrl-C");
                commands.post(Command::Shutdown);
                result.map_err(Into::into)
            }
            result = controller => result,
        }
    };

    proximity.stop();
    admin_shutdown.cancel();
    admin_task.abort();
    heartbeat.abort();
    dd_incr!("main.count.global.exiting_main_program");
    result
}
