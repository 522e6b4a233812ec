use conduit::config::Config;
use conduit::connector::{Helper, ServerHandler, Side};
use conduit::http::{Request, Response};
use conduit::io::PlainTransport;
use conduit::server;
use tracing::Level;

fn echo(req: &Request) -> Response {
    if req.body.is_empty() {
        Response::ok(format!("{} {}\n", req.method, req.path))
    } else {
        Response::ok(req.body.clone())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::load()?;

    let level = if cfg.connector.tracing {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_max_level(level)
        .init();

    let helper =
        Helper::<PlainTransport>::new(Side::Server, cfg.connector.clone(), ServerHandler::new(echo))?;
    helper.start()?;

    let listener = server::bind(&cfg.listen_addr, &helper)?;
    tracing::info!("Conduit serving on {}", listener.local_addr());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    tokio::task::spawn_blocking(move || helper.stop()).await?;

    Ok(())
}
