use cadbridge::app::cli::Args;
use cadbridge::{Bridge, ConnectionState, MemoryScene, Settings};
use std::process::ExitCode;
use std::thread;
use std::time::Instant;
use tracing::{error, info, Level};

fn main() -> ExitCode {
    // Parse command line arguments
    let args = Args::parse_args();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .init();

    let settings_path = args.settings_path();
    let mut settings = match Settings::load_from_file(&settings_path) {
        Ok(Some(settings)) => settings,
        Ok(None) => {
            info!("No settings at {:?}, using defaults", settings_path);
            Settings::default()
        }
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    args.apply(&mut settings);

    let mut bridge = Bridge::new(MemoryScene::new(), settings);
    if let Err(e) = bridge.connect() {
        error!("Failed to start connecting: {}", e);
        return ExitCode::FAILURE;
    }

    let started = Instant::now();
    let mut requested = false;
    loop {
        bridge.tick();

        if bridge.handler().is_connected() && !requested {
            requested = true;
            if args.subscribe {
                if let Err(e) = bridge.subscribe_all() {
                    error!("Subscribe failed: {}", e);
                }
            }
            if args.refresh {
                if let Err(e) = bridge.refresh() {
                    error!("Refresh failed: {}", e);
                }
            }
        }

        if matches!(
            bridge.state(),
            ConnectionState::Disconnected | ConnectionState::Error
        ) {
            // The I/O thread posts its disconnect after the state change; join it first
            bridge.disconnect();
            break;
        }

        if args.run_time().is_some_and(|limit| started.elapsed() >= limit) {
            bridge.disconnect();
            break;
        }

        thread::sleep(args.tick_interval());
    }

    let summary = bridge.scene().summary();
    info!(
        "Scene: {} containers, {} objects ({} linked), {} polygons",
        summary.containers, summary.objects, summary.linked_objects, summary.polygons
    );
    for line in bridge.scene().outline() {
        info!("{}", line);
    }

    if bridge.state() == ConnectionState::Error {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
