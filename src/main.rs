//! Ticket relay service binary.

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ticket_relay::server::run().await
}
