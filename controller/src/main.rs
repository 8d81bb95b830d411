mod clock;
mod gateway;
mod host;
mod indicator;
mod store;
mod transport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
