#[tokio::main]
async fn main() {
    if let Err(e) = carebridge_lib::run().await {
        tracing::error!(error = %e, "CareBridge stopped");
        std::process::exit(1);
    }
}
