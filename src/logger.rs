use log::LevelFilter;
use std::io::Write;

/// Initialize console logging.
///
/// Level is controlled via the `RUST_LOG` environment variable
/// (`error`, `warn`, `info`, `debug`, `trace`); defaults to `info`.
/// Safe to call more than once; later calls are no-ops.
///
/// Library consumers with their own logger setup can skip this entirely;
/// the engine only uses the `log` facade.
pub fn init_logger() {
    let default_level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);

    let _ = env_logger::Builder::from_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{:5}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter_level(default_level)
        .target(env_logger::Target::Stdout)
        .try_init();
}
