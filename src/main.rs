#[tokio::main]
async fn main() -> anyhow::Result<()> {
    chunkscribe::run().await
}
