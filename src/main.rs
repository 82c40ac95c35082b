use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use vrcp::args::{Invocation, print_usage};
use vrcp::utils::format_bytes;
use vrcp::{APP_NAME, CopyEngine, SharedProgress, VERSION, hash_file, hash_folder, is_directory};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let program_name = args.first().map(String::as_str).unwrap_or("vrcp");
    if args.len() <= 1 {
        print_usage(program_name);
        return ExitCode::SUCCESS;
    }

    let invocation = match Invocation::parse_from(args.iter().skip(1).cloned()) {
        Ok(inv) => inv,
        Err(e) => {
            eprintln!("Error: {e}");
            print_usage(program_name);
            return ExitCode::FAILURE;
        }
    };

    if invocation.hash_only {
        return print_digests(&invocation);
    }

    let progress = SharedProgress::new();

    // Handle Ctrl+C
    let cancel_handle = progress.cancel_token().clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nCancelling...");
        cancel_handle.cancel();
    }) {
        tracing::warn!(error = %e, "could not install Ctrl-C handler");
    }

    println!("{APP_NAME} version {VERSION}");
    let engine = CopyEngine::new(invocation.options.clone(), progress.clone());
    let handle = engine.spawn(invocation.source.clone(), invocation.destinations.clone());

    let mut errors_shown = 0;
    while !handle.is_finished() {
        let info = progress.snapshot();
        if invocation.show_progress && info.bytes_total > 0 {
            eprint!(
                "\r{:.0}% - {} of {}",
                info.percentage(),
                format_bytes(info.bytes_done),
                format_bytes(info.bytes_total)
            );
        }
        if let Some(log) = progress.error_log() {
            for failure in log.since(errors_shown) {
                eprintln!("\nFAILED: {}: {}", failure.path.display(), failure.message);
                errors_shown += 1;
            }
        }
        thread::sleep(POLL_INTERVAL);
    }
    if invocation.show_progress {
        eprintln!();
    }

    let result = match handle.join() {
        Ok(result) => result,
        Err(_) => {
            eprintln!("Copy thread panicked");
            return ExitCode::FAILURE;
        }
    };

    let failures = progress
        .error_log()
        .map(|log| log.since(errors_shown))
        .unwrap_or_default();
    for failure in &failures {
        eprintln!("FAILED: {}: {}", failure.path.display(), failure.message);
    }

    match result {
        Ok(stats) => {
            println!("{stats}");
            if progress.error_log().is_some_and(|log| !log.is_empty()) {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            eprintln!("Execution finished with error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn print_digests(invocation: &Invocation) -> ExitCode {
    let options = &invocation.options;
    let mut status = ExitCode::SUCCESS;
    let paths = std::iter::once(&invocation.source).chain(invocation.destinations.iter());

    for path in paths {
        let digest = match is_directory(path) {
            Ok(true) => hash_folder(path, options.algorithm, options.entry_order),
            Ok(false) => hash_file(path, options.algorithm),
            Err(e) => Err(e),
        };
        match digest {
            Ok(digest) => println!("{digest}  {}", path.display()),
            Err(e) => {
                eprintln!("Error: {e}");
                status = ExitCode::FAILURE;
            }
        }
    }
    status
}
