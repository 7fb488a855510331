//! Binary entrypoint for the subfont CLI.

fn main() {
    if let Err(err) = subfont_cli::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
