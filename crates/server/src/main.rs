#[tokio::main]
async fn main() -> anyhow::Result<()> {
    lectern_server::run().await
}
