//! Voxgate — WebRTC voice-assistant gateway.

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Rustls 0.23+ needs an installed crypto provider before any TLS use.
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install Rustls crypto provider");

    voxgate::cli::run().await
}
