use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    epic_cli::main_entry().await
}
