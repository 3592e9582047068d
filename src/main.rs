//! Connect to the first Acaia Lunar scale found and print what it reports.
//!
//! Type a command and press enter: `t` tare, `s` start timer, `p` stop timer, `r` reset timer,
//! `q` quit. Set `RUST_LOG=lunarread=info` to see the session log.

use lunarread::{BluestTransport, ScaleConfig, ScaleEvent, ScaleSession};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ScaleConfig::default();
    let transport = BluestTransport::new(&config).await;
    let (session, mut events) = ScaleSession::new(transport, config);

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ScaleEvent::Status(status) => println!("status: {status}"),
                ScaleEvent::Device(Some(name)) => println!("device: {name}"),
                ScaleEvent::Weight(Some(weight)) => println!("weight: {weight:.1} g"),
                ScaleEvent::Battery(Some(battery)) => println!("battery: {battery}%"),
                _ => {}
            }
        }
    });

    session.connect().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "t" => session.tare().await,
            "s" => session.start_timer().await,
            "p" => session.stop_timer().await,
            "r" => session.reset_timer().await,
            "q" => break,
            "" => {}
            other => println!("unknown command: {other}"),
        }
    }

    session.disconnect().await;
    drop(session);
    printer.await?;
    Ok(())
}
