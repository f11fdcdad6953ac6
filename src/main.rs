mod config;
mod data_io;
mod probe;
mod rate;
mod runtime;
mod scan;
mod title;
mod transport;
mod types;
mod verify;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    runtime::run().await
}
