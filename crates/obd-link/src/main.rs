//! OBD Link - Main Entry Point

use anyhow::Context;
use obd_broker::{
    ConnectionBroker, Connector, LinkEvent, MockTransport, SerialTransport, Transport,
};
use obd_link::{init_logging, simulated_reply, Elm327Init, RawPoller, Settings};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args().nth(1);
    let settings = Settings::load(path.as_deref()).context("loading settings")?;

    if let Err(e) = init_logging(&settings.log_level) {
        eprintln!("logging disabled: {}", e);
    }

    info!("=== OBD Link v{} ===", env!("CARGO_PKG_VERSION"));

    if settings.mock {
        info!("Using simulated adapter");
        run(settings, MockTransport::new().with_responder(simulated_reply)).await
    } else {
        run(settings, SerialTransport::new()).await
    }
}

async fn run<T: Transport>(settings: Settings, transport: T) -> anyhow::Result<()> {
    let broker = ConnectionBroker::new(transport);
    let connector = broker
        .configure(settings.connect_options()?)
        .context("configuring connector")?;
    let init = Elm327Init::from_settings(&settings.adapter);
    let request_timeout = Duration::from_millis(settings.adapter.command_timeout_ms);

    // Both tasks ask for the line independently; the broker opens it once
    let monitor = tokio::spawn(monitor_events(connector.clone(), init.clone()));

    let (reply_tx, mut reply_rx) = mpsc::channel(32);
    let poller = {
        let connector = connector.clone();
        let mut poller = RawPoller::new(&settings.poll, request_timeout);
        tokio::spawn(async move {
            let conn = connector.connect(move |conn| init.run(conn)).await?;
            poller.run(&conn, reply_tx).await;
            Ok::<(), anyhow::Error>(())
        })
    };

    let printer = tokio::spawn(async move {
        while let Some(reply) = reply_rx.recv().await {
            info!("{} -> {}", reply.request, reply.text);
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
        result = poller => match result {
            Ok(Ok(())) => info!("Poller finished"),
            Ok(Err(e)) => error!("Poller failed: {:#}", e),
            Err(e) => error!("Poller task failed: {}", e),
        },
    }

    monitor.abort();
    printer.abort();
    broker.reset().await;
    Ok(())
}

async fn monitor_events<T: Transport>(connector: Connector<T>, init: Elm327Init) {
    let conn = match connector.connect(move |conn| init.run(conn)).await {
        Ok(conn) => conn,
        Err(e) => {
            error!("Event monitor could not connect: {}", e);
            return;
        }
    };

    let mut events = conn.subscribe();
    loop {
        match events.recv().await {
            Ok(LinkEvent::Data(bytes)) => debug!("line: {:?}", String::from_utf8_lossy(&bytes)),
            Ok(LinkEvent::Error(e)) => warn!("Line error on {}: {}", conn.path(), e),
            Err(RecvError::Lagged(missed)) => warn!("Event monitor missed {} events", missed),
            Err(RecvError::Closed) => break,
        }
    }
}
