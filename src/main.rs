#[tokio::main]
async fn main() -> anyhow::Result<()> {
    elder::bootstrapper::run().await
}
