use std::path::Path;

use tracing::Level;
use tracing_subscriber::filter::Targets;

static mut GUARD: Option<tracing_chrome::FlushGuard> = None;

/// Installs colored backtraces and, when the `DEBUG` env var is set at build
/// time, a tree-shaped log on stderr plus a chrome trace under `./log/`.
///
/// `DEBUG` is read as a target filter such as `zap_leaf=trace,fuzz=debug`;
/// any value that does not parse logs the leaf engine at trace level.
pub fn setup_test_log() {
    color_backtrace::install();
    use tracing_chrome::ChromeLayerBuilder;
    use tracing_subscriber::{prelude::*, registry::Registry};
    if let Some(filter) = option_env!("DEBUG") {
        let targets = filter
            .parse::<Targets>()
            .unwrap_or_else(|_| Targets::new().with_target("zap_leaf", Level::TRACE));
        // suffix should be current date time
        let time_suffix = chrono::Local::now().format("%Y-%m-%d-%H-%M-%S").to_string();
        std::fs::create_dir_all("./log").unwrap();
        let (chrome_layer, _guard) = ChromeLayerBuilder::new()
            .include_args(true)
            .include_locations(true)
            .file(Path::new(
                format!("./log/zap-leaf-{}.json", time_suffix).as_str(),
            ))
            .build();
        // SAFETY: Test
        unsafe { GUARD = Some(_guard) };
        tracing::subscriber::set_global_default(
            Registry::default()
                .with(
                    tracing_tree::HierarchicalLayer::new(2)
                        .with_targets(true)
                        .with_bracketed_fields(true),
                )
                .with(chrome_layer)
                .with(targets),
        )
        .unwrap();
    }
}
