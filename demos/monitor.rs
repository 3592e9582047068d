use std::time::Duration;

use lunarread::{BluestTransport, ScaleConfig, ScaleSession};

#[tokio::main]
pub async fn main(){
    tracing_subscriber::fmt().with_env_filter("lunarread=info").init();

    let config = ScaleConfig::default();
    let transport = BluestTransport::new(&config).await;
    let (session, _events) = ScaleSession::new(transport, config);
    session.connect().await.unwrap();
    loop {
        tokio::time::sleep(Duration::from_secs(5)).await;
        println!("weight: {:?} g, battery: {:?}%", session.weight(), session.battery());
    }
}
