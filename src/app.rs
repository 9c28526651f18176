use crate::{
    camera::{Camera, DetectionWorker},
    config::Config,
    detector::Detector,
    labels::ClassLabels,
    ort_detector::OrtDetector,
    server::{HttpServer, SharedState},
    telemetry::Metrics,
};
use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let detector: Arc<dyn Detector> = match OrtDetector::new(&config.model) {
        Ok(detector) => Arc::new(detector),
        Err(e) => {
            tracing::error!("failed to initialize detector: {:?}", e);
            return Err(e.into());
        }
    };

    let labels = match ClassLabels::load(&config.labels.get_labels_path()) {
        Ok(labels) => Arc::new(labels),
        Err(e) => {
            tracing::error!("failed to load class labels: {:?}", e);
            return Err(Box::new(e));
        }
    };

    let metrics = Arc::new(Metrics::new());
    let (shutdown_tx, _) = broadcast::channel(1);

    let camera = if config.camera.enabled {
        let camera = match Camera::new(config.camera.device_index).await {
            Ok(camera) => Arc::new(camera),
            Err(e) => {
                tracing::error!("failed to initialize camera: {:?}", e);
                return Err(Box::new(e));
            }
        };

        DetectionWorker::new(
            camera.clone(),
            detector.clone(),
            labels.clone(),
            metrics.clone(),
            config.pipeline.clone(),
            &config.camera,
        )
        .spawn(shutdown_tx.subscribe());

        Some(camera)
    } else {
        tracing::info!("camera disabled, live feed will be unavailable");
        None
    };

    let state = SharedState {
        detector,
        labels,
        pipeline: config.pipeline.clone(),
        camera,
        camera_config: config.camera.clone(),
        metrics,
    };

    let server = HttpServer::new(state, &config.server).await?;
    let server_handle = server.run(shutdown_tx.subscribe()).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    let _ = server_handle.await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
