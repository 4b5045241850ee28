// src/bin/dso_demo.rs
//! Runs a session against the synthetic demo device and prints what a
//! display front end would receive. Doubles as the crate's usage example.

use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use dso_core::config::DsoConfig;
use dso_core::spec::{ModelRegistry, TriggerMode, TriggerSlope};
use dso_core::transport::DemoTransport;
use dso_core::{Session, StatusEvent, Subscriber};

const CYCLES_TO_PRINT: usize = 5;

fn main() -> dso_core::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let registry = ModelRegistry::builtin();
    let mut config = DsoConfig::default();
    config.scope.record_length = 2048;
    config.scope.trigger.mode = TriggerMode::Auto;
    config.scope.trigger.slope = TriggerSlope::Rising;
    config.scope.trigger.level_volts = 0.5;
    config.post.spectrum.enabled = true;
    config.post.spectrum.size = 1024;

    let mut session = Session::open(
        Box::new(DemoTransport::new()),
        &registry,
        config,
        None,
    )?;
    info!(model = %session.model().name, identity = %session.identity(), "session open");

    session.subscribe(Subscriber::new().status(|event| {
        if let StatusEvent::StageWarning { stage, message } = event {
            eprintln!("stage '{stage}' warned: {message}");
        }
    }));

    let samples = session.subscribe_channel();
    let control = session.handle();
    control.enable_sampling(true)?;

    let mut printed = 0;
    while printed < CYCLES_TO_PRINT {
        let set = match samples.recv_timeout(Duration::from_secs(5)) {
            Ok(set) => set,
            Err(_) => {
                eprintln!("no data within 5 s, giving up");
                break;
            }
        };
        printed += 1;
        println!(
            "cycle {:>4}  {} channel(s) x {} samples  interval {:.3} us  trigger {:?}",
            set.cycle,
            set.channels.len(),
            set.sample_count(),
            set.sample_interval * 1e6,
            set.trigger,
        );
        for trace in &set.channels {
            let peak = trace.voltage.iter().fold(0.0f64, |m, &v| m.max(v.abs()));
            println!(
                "    {}  {:>5.2} V/div  peak {:.3} V  spectrum: {}",
                trace.source,
                trace.volts_per_div,
                peak,
                if trace.spectrum.is_some() { "yes" } else { "no" },
            );
        }
    }

    control.enable_sampling(false)?;
    session.shutdown()
}
