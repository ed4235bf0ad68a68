use anyhow::Result;
use sesamo::cli::start;

#[tokio::main]
async fn main() -> Result<()> {
    let action = start()?;

    action.execute().await
}
