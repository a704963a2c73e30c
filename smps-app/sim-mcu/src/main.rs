use clap::Parser;
use core::cell::RefCell;
use embassy_executor::{Executor, Spawner};
use embassy_time::{Duration, Instant, Ticker};
use smps_core::mk_static;
use smps_core::utils::controllers::sampler::PlantSensor;
use smps_core::utils::controllers::DutyCycleModulator;
use smps_core::utils::{setpoint_ch, Setpoint, SmpsCommand, SmpsConfig, SmpsController, SMPS_CHANNEL};
use static_cell::StaticCell;
use std::path::PathBuf;
use tracing::{error, info};

mod plant;

use plant::{BuckPlant, SimAdc, SimIna219, SimPwm};

type SimController = SmpsController<PlantSensor<'static, SimAdc, SimIna219>, DutyCycleModulator<SimPwm>>;

#[derive(Parser)]
#[clap(version = "1.0")]
struct Opts
{
    /// initial reference voltage (V)
    #[clap(long, default_value_t = 3.3)]
    vref: f32,
    /// converter input voltage (V)
    #[clap(long, default_value_t = 5.0)]
    vin: f32,
    /// resistive load on the output (Ω)
    #[clap(long, default_value_t = 10.0)]
    load_ohms: f32,
    /// stop after this many milliseconds
    #[clap(long, default_value_t = 2000)]
    duration_ms: u64,
    /// JSON setpoint command sent halfway through, e.g. '{"sc":"v","v":2.5}'
    #[clap(long)]
    retarget: Option<String>,
    /// JSON file overriding SmpsConfig fields
    #[clap(long)]
    config: Option<PathBuf>,
}

#[embassy_executor::task]
async fn control_task(
    ctrl: &'static mut SimController,
    setpoint: &'static Setpoint,
) -> ! {
    ctrl.run(setpoint).await
}

#[embassy_executor::task]
async fn setpoint_task(setpoint: &'static Setpoint) -> ! {
    setpoint_ch(setpoint).await
}

#[embassy_executor::task]
async fn monitor_task(
    plant: &'static RefCell<BuckPlant>,
    setpoint: &'static Setpoint,
    duration_ms: u64,
    retarget: Option<SmpsCommand>,
) {
    let start = Instant::now();
    let mut ticker = Ticker::every(Duration::from_millis(100));
    let mut retarget = retarget;

    loop {
        ticker.next().await;
        let elapsed = start.elapsed().as_millis();
        let p = *plant.borrow();
        info!(
            t_ms = elapsed,
            vref = setpoint.get(),
            vout = p.vout,
            il = p.il,
            duty = p.duty,
            "plant"
        );

        if elapsed >= duration_ms / 2 {
            if let Some(cmd) = retarget.take() {
                info!(?cmd, "sending setpoint command");
                SMPS_CHANNEL.send(cmd).await;
            }
        }
        if elapsed >= duration_ms {
            info!(vout = p.vout, "simulation finished");
            std::process::exit(0);
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> SmpsConfig {
    let Some(path) = path else {
        return SmpsConfig::default();
    };
    let parsed = std::fs::read(path)
        .map_err(|e| error!(?path, %e, "cannot read configuration"))
        .and_then(|bytes| {
            SmpsConfig::from_json(&bytes).map_err(|e| error!(?path, ?e, "bad configuration"))
        });
    match parsed {
        Ok(config) => config,
        Err(()) => std::process::exit(2),
    }
}

#[embassy_executor::task]
async fn main_task(spawner: Spawner) {
    let opts: Opts = Opts::parse();
    let config = load_config(opts.config.as_ref());

    let retarget = match opts.retarget.as_deref().map(|s| SmpsCommand::from_json(s.as_bytes())) {
        None => None,
        Some(Ok(cmd)) => Some(cmd),
        Some(Err(e)) => {
            error!(%e, "invalid --retarget command");
            std::process::exit(2);
        }
    };

    let plant = mk_static!(RefCell<BuckPlant>, RefCell::new(BuckPlant::new(opts.vin, opts.load_ohms)));
    let plant: &'static RefCell<BuckPlant> = plant;
    let i2c_bus = mk_static!(RefCell<SimIna219>, RefCell::new(SimIna219::new(plant)));
    let setpoint = mk_static!(Setpoint, Setpoint::new(0.0));
    if let Err(e) = setpoint.set(opts.vref) {
        error!(?e, vref = opts.vref, "invalid --vref");
        std::process::exit(2);
    }
    let setpoint: &'static Setpoint = setpoint;

    // Peripheral faults are fatal: never run the loop uncalibrated.
    let ctrl = match SmpsController::setup(SimAdc::new(plant), i2c_bus, SimPwm::new(plant, config.ts), config) {
        Ok(ctrl) => ctrl,
        Err(e) => {
            error!(?e, "SMPS peripheral init failed, halting");
            std::process::exit(1);
        }
    };
    let ctrl = mk_static!(SimController, ctrl);

    spawner.spawn(setpoint_task(setpoint)).unwrap();
    spawner.spawn(monitor_task(plant, setpoint, opts.duration_ms, retarget)).unwrap();
    spawner.spawn(control_task(ctrl, setpoint)).unwrap();
}

static EXECUTOR: StaticCell<Executor> = StaticCell::new();

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let executor = EXECUTOR.init(Executor::new());
    executor.run(|spawner| {
        spawner.spawn(main_task(spawner)).unwrap();
    });
}
