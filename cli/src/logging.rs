/// `-v` count to default filter. `RUST_LOG` wins when set.
pub fn init(verbosity: usize) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env = env_logger::Env::default().default_filter_or(level);
    env_logger::Builder::from_env(env).format_timestamp_millis().init();
}
