use clap::{App, Arg};
use irccore::logging;
use irccore::{IrcConfig, Server};
use std::path::Path;
use std::process;

fn main() {
    let matches = App::new("ircrunner")
        .about("RFC 1459 IRC server")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .takes_value(true)
                .help("Path to the TOML configuration file"),
        )
        .get_matches();

    let log = logging::init();

    let config = match matches.value_of("config") {
        Some(path) if Path::new(path).exists() => IrcConfig::load(path),
        Some(path) => {
            logging::error!(log, "configuration file not found"; "path" => path);
            process::exit(1);
        }
        None => IrcConfig::default(),
    };

    let mut server = match Server::new(config, log.clone()) {
        Ok(server) => server,
        Err(err) => {
            logging::error!(log, "startup failed"; "error" => ?err);
            process::exit(1);
        }
    };

    if let Err(err) = server.run() {
        logging::error!(log, "server terminated"; "error" => ?err);
        process::exit(1);
    }
}
