use irccore::IrcConfig;

fn main() {
    let config =
        serdeconv::to_toml_string(&IrcConfig::default()).expect("Failed to generate config file");

    println!("{}", config);
}
