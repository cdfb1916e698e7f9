use std::sync::Arc;
use std::time::Duration;

use actix_web::{get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder};
use clap::Parser;
use futures::future::join_all;
use kube::{Api, Client};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use business_controllers::chartgroup::ChartGroupController;
use business_controllers::clients::Clients;
use business_controllers::config::{ControllerOptions, Options};
use business_controllers::imagenamespace::ImageNamespaceController;
use business_controllers::namespace::NamespaceController;
use business_controllers::nsemigration::NsEmigrationController;
use business_controllers::platform::PlatformController;
use business_controllers::project::ProjectController;
use business_controllers::remote::kube::KubeClusterClientFactory;
use business_controllers::runtime::informer::watch_events;
use business_controllers::runtime::{Controller, HealthCheckRegistry, Reconciler};
use business_controllers::telemetry::state::State;
use business_controllers::telemetry::telemetry;

/// Starts `reconciler` on a watch of every object of its kind.
fn spawn<R: Reconciler>(
    client: &Client,
    reconciler: R,
    options: ControllerOptions,
    state: &State,
    resync: Duration,
    shutdown: &CancellationToken,
) -> JoinHandle<()> {
    let events = watch_events(Api::<R::Object>::all(client.clone()), resync, shutdown.child_token());
    let controller = Controller::new(Arc::new(reconciler), options, state.clone());
    tokio::spawn(controller.run(events, shutdown.clone()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = Options::parse();
    telemetry::init(options.log_json)?;

    let client = Client::try_default().await?;
    let clusters = KubeClusterClientFactory::from_path(options.clusters_kubeconfig.as_deref())?;
    let clients = Clients::kube(client.clone(), Arc::new(clusters));
    let settings = options.settings();
    let state = State::default();
    let shutdown = CancellationToken::new();

    let health = |name: &str| {
        HealthCheckRegistry::new(
            shutdown.child_token(),
            settings.health_check_interval,
            state.metrics.reconcile.health_loop_gauge(name),
        )
    };
    let resync = settings.resync_period;
    let controllers = vec![
        spawn(
            &client,
            ProjectController::new(clients.clone(), settings.clone()),
            options.project(),
            &state,
            resync,
            &shutdown,
        ),
        spawn(
            &client,
            NamespaceController::new(
                clients.clone(),
                settings.clone(),
                health(NamespaceController::NAME),
            ),
            options.namespace(),
            &state,
            resync,
            &shutdown,
        ),
        spawn(
            &client,
            ChartGroupController::new(
                clients.clone(),
                settings.clone(),
                health(ChartGroupController::NAME),
            ),
            options.chart_group(),
            &state,
            resync,
            &shutdown,
        ),
        spawn(
            &client,
            ImageNamespaceController::new(
                clients.clone(),
                settings.clone(),
                health(ImageNamespaceController::NAME),
            ),
            options.image_namespace(),
            &state,
            resync,
            &shutdown,
        ),
        spawn(
            &client,
            PlatformController::new(clients.clone(), settings.clone()),
            options.platform(),
            &state,
            resync,
            &shutdown,
        ),
        spawn(
            &client,
            NsEmigrationController::new(clients.clone(), settings.clone()),
            options.emigration(),
            &state,
            resync,
            &shutdown,
        ),
    ];

    let data = Data::new(state.clone());
    let server = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(index)
            .service(health_check)
            .service(metrics)
    })
    .bind(&options.bind)?
    .shutdown_timeout(5)
    .run();

    // the server owns signal handling, controllers stop with it
    let stop = shutdown.clone();
    let served = async move {
        let served = server.await;
        info!("shutting down controllers");
        stop.cancel();
        served
    };
    let (_, served) = tokio::join!(join_all(controllers), served);
    served?;
    Ok(())
}

#[get("/metrics")]
async fn metrics(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let metrics = c.metrics();
    HttpResponse::Ok()
        .content_type("application/openmetrics-text; version=1.0.0; charset=utf-8")
        .body(metrics)
}

#[get("/health")]
async fn health_check(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/")]
async fn index(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}
