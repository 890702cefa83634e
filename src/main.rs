use std::process::ExitCode;

fn main() -> ExitCode {
    let args = canham::cli::parse();

    #[cfg(feature = "logging")]
    if let Err(e) = canham::logging::init_logging(args.log_level) {
        eprintln!("{e:#}");
    }

    match canham::run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        // Every layer of `CanhamError` already prints the error it wraps.
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
