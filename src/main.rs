use ut61e_auto::{get_unix_ts, DriverError, MeterConfig, Ut61eDriver};
use ut61e_auto::config::WCH_VENDOR_ID;
use log::error;
use serde::Serialize;
use serde_json::json;
use std::env;
use std::process::ExitCode;

const USAGE: &str = "usage: ut61e-auto [--simulate] <list|info|read|average|resistance|stable|watch <n>>";

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(e) => error!("Unable to serialize output: {e}"),
    }
}

fn run(driver: &mut Ut61eDriver, command: &str, args: &[String]) -> Result<(), DriverError> {
    match command {
        "info" => print_json(&driver.device_info()),
        "read" => {
            let reading = driver.read_value()?;
            print_json(&json!({ "ts": get_unix_ts(), "reading": reading }));
        }
        "average" => {
            let sampling = driver.config().sampling.clone();
            let reading = driver.read_averaged(sampling.sample_count, sampling.sample_delay())?;
            print_json(&json!({ "ts": get_unix_ts(), "reading": reading }));
        }
        "resistance" => {
            let ohms = driver.measure_resistance()?;
            print_json(&json!({ "ts": get_unix_ts(), "ohms": ohms }));
        }
        "stable" => {
            let reading = driver.wait_for_stable_default()?;
            print_json(&json!({ "ts": get_unix_ts(), "reading": reading }));
        }
        "watch" => {
            let count: u32 = match args.first().map(|a| a.parse()) {
                Some(Ok(n)) => n,
                Some(Err(_)) => return Err(DriverError::General(format!("invalid count '{}'", args[0]))),
                None => 10,
            };
            let interval = driver.config().timing.poll_interval();
            for i in 0..count {
                let reading = driver.read_value()?;
                print_json(&json!({ "ts": get_unix_ts(), "n": i + 1, "reading": reading }));
                if i + 1 < count {
                    std::thread::sleep(interval);
                }
            }
        }
        other => return Err(DriverError::General(format!("unknown command '{other}'\n{USAGE}"))),
    }
    Ok(())
}

fn main() -> ExitCode {
    // Initialize logging
    let default_filter = std::env::var("UT61E_LOG_LEVEL").unwrap_or("info".to_string());
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(default_filter));

    let mut simulate = false;
    let mut rest: Vec<String> = Vec::new();
    for arg in env::args().skip(1) {
        if arg == "--simulate" {
            simulate = true;
        } else {
            rest.push(arg);
        }
    }

    let command = match rest.first() {
        Some(c) => c.clone(),
        None => {
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
    };

    let mut config = match MeterConfig::load() {
        Ok(c) => c,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if simulate {
        config.connection.simulate = true;
    }

    /* enumeration needs no session */
    if command == "list" {
        let vendor_id = if config.connection.vendor_id == 0 { WCH_VENDOR_ID } else { config.connection.vendor_id };
        for device in Ut61eDriver::list_devices(vendor_id) {
            print_json(&device);
        }
        return ExitCode::SUCCESS;
    }

    let mut driver = match Ut61eDriver::new(config) {
        Ok(d) => d,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    if command != "info" {
        if let Err(e) = driver.initialize() {
            error!("Meter initialization failed: {e}");
            return ExitCode::FAILURE;
        }
    }

    let result = run(&mut driver, &command, &rest[1..]);
    driver.shutdown();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(DriverError::Timeout(msg)) => {
            /* timeouts exit with 3 */
            error!("Timed out: {msg}");
            ExitCode::from(3)
        }
        Err(DriverError::General(msg)) => {
            error!("{msg}");
            ExitCode::FAILURE
        }
    }
}
