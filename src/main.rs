use std::path::Path;

fn usage() -> &'static str {
    "Usage:
  chanflow [<caseRoot>]

  <caseRoot> defaults to the current directory and must contain
  constant/, system/ and an initial time directory with p and U."
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let arg = std::env::args().nth(1);
    let root = match arg.as_deref() {
        Some("-h") | Some("--help") => {
            println!("{}", usage());
            return;
        }
        Some(path) => path.to_string(),
        None => ".".to_string(),
    };

    if let Err(err) = chanflow::run(Path::new(&root)) {
        log::error!("{}", err);
        std::process::exit(1);
    }
}
