#[tokio::main]
async fn main() {
    if let Err(e) = extsign_server::run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
