#[tokio::main]
async fn main() -> anyhow::Result<()> {
    flowtrace_lib::run().await
}
