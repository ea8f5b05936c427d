#[tokio::main]
async fn main() -> anyhow::Result<()> {
    vox_operis_studio_lib::run().await
}
