use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use libcosmics::cache::TriggeredCache;
use libcosmics::config::Config;
use libcosmics::mask::Mask;
use libcosmics::status::{new_shared_status, SharedStatus};

fn make_template_config(path: &Path) {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config).unwrap();
    let mut file = File::create(path).expect("Could create template config file!");
    file.write_all(yaml_str.as_bytes())
        .expect("Failed to write yaml data to file!");
}

fn config_arg() -> Arg {
    Arg::new("config").required(true).help(
        "Path to the configuration yaml file (run the `new` subcommand for a template)",
    )
}

/// Drive the progress bar from the shared scan status until the worker
/// thread is done, then hand back its result.
fn poll_scan<T, E>(
    handle: std::thread::JoinHandle<Result<T, E>>,
    status: &SharedStatus,
    pb: &ProgressBar,
) -> Option<T>
where
    T: Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    loop {
        std::thread::sleep(Duration::from_millis(500));
        match status.lock() {
            Ok(stat) => {
                pb.set_position((stat.fraction * 100.0) as u64);
                pb.set_message(format!(
                    "triggered: {} cells: {} mem: {:.0}%",
                    stat.n_triggered, stat.cells_found, stat.memory_percent
                ));
            }
            Err(e) => log::error!("{e}"),
        }

        if handle.is_finished() {
            match handle.join() {
                Ok(Ok(result)) => return Some(result),
                Ok(Err(e)) => {
                    log::error!("Scan failed with error: {e}");
                    return None;
                }
                Err(_) => {
                    log::error!("Failed to join scan task!");
                    return None;
                }
            }
        }
    }
}

fn load_config(matches: &clap::ArgMatches) -> Option<Config> {
    let config_path = PathBuf::from(matches.get_one::<String>("config").expect("We require args"));
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return None;
        }
    };
    log::info!("Config successfully loaded.");
    log::info!("Build File: {}", config.build_file.to_string_lossy());
    log::info!("Build Tree: {}", config.build_tree);
    log::info!("Triggered Path: {}", config.triggered_path.to_string_lossy());
    log::info!("Mask Path: {}", config.mask_path.to_string_lossy());
    log::info!("Step Size: {}", config.step_size);
    log::info!("Trigger: {}", config.trigger);
    Some(config)
}

fn main() {
    // Create a cli
    let matches = Command::new("cosmics_cli")
        .arg_required_else_help(true)
        .subcommand(
            Command::new("new")
                .about("Make a template configuration yaml file")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("select")
                .about("Select the events passing the configured trigger, using the cache")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("mask")
                .about("Build (or load) the channel mask grid and its layer plots")
                .arg(config_arg()),
        )
        .get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    LogWrapper::new(pb_manager.clone(), logger)
        .try_init()
        .expect("Could not create logging/progress!");

    match matches.subcommand() {
        Some(("new", sub_matches)) => {
            let config_path =
                PathBuf::from(sub_matches.get_one::<String>("config").expect("We require args"));
            log::info!(
                "Making a template config at {}...",
                config_path.to_string_lossy()
            );
            make_template_config(&config_path);
            log::info!("Done.");
        }
        Some(("select", sub_matches)) => {
            let Some(config) = load_config(sub_matches) else {
                return;
            };
            let cache = TriggeredCache::new(
                &config.triggered_path,
                &config.build_file,
                &config.build_tree,
                &config.step_size,
            );
            let trigger = config.trigger.clone();
            let entry_stop = config.entry_stop;

            let pb = pb_manager.add(ProgressBar::new(100));
            pb.set_style(progress_style());
            let status = new_shared_status();
            let sent_status = status.clone();
            // Spawn the task!
            let handle =
                std::thread::spawn(move || cache.get(&trigger, entry_stop, Some(&sent_status)));
            let result = poll_scan(handle, &status, &pb);
            pb.finish();
            if let Some(events) = result {
                log::info!("Selected {} triggered events.", events.n_rows());
                log::info!("Done.");
            }
        }
        Some(("mask", sub_matches)) => {
            let Some(config) = load_config(sub_matches) else {
                return;
            };
            let pb = pb_manager.add(ProgressBar::new(100));
            pb.set_style(progress_style());
            let status = new_shared_status();
            let sent_status = status.clone();
            let handle = std::thread::spawn(move || {
                Mask::from_build_file(
                    &config.mask_path,
                    &config.build_file,
                    &config.build_tree,
                    &config.axes,
                    config.entry_stop,
                    &config.step_size,
                    Some(&sent_status),
                )
            });
            let result = poll_scan(handle, &status, &pb);
            pb.finish();
            if let Some(mask) = result {
                log::info!("Mask grid ready with {} layers.", mask.n_layers());
                log::info!("Done.");
            }
        }
        _ => {}
    }
}

fn progress_style() -> ProgressStyle {
    ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan} {pos:>3}% {msg}")
        .expect("Bad progress bar template")
}
