// Binary entry point for nbboot
// This is a thin wrapper that delegates to the library implementation

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = nbboot::shell::run().await {
        eprintln!("nbboot fatal error: {:#}", e);
        return Err(e);
    }
    Ok(())
}
