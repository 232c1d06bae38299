mod demo;

use std::process::ExitCode;
use std::sync::Arc;

use server::AppState;
use zarr_cache::PixelBufferCache;
use zarr_config::Config;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            return ExitCode::FAILURE;
        },
    };

    let metadata = Arc::new(demo::DemoMetadataSource);
    let pixel_source = Arc::new(demo::DemoPixelSource);
    let cache = Arc::new(PixelBufferCache::new(
        config.buffer_cache_size,
        Arc::clone(&metadata) as Arc<dyn zarr_model::MetadataSource>,
        pixel_source,
    ));

    let state = Arc::new(AppState::new(Arc::clone(&config), cache, metadata));
    match server::run(state).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "server error");
            ExitCode::FAILURE
        },
    }
}
