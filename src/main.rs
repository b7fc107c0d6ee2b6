use commander::{app, logging};

#[tokio::main]
async fn main() {
    logging::init();
    std::process::exit(app::run().await);
}
