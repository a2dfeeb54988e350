use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stackwatch_lib::run(stackwatch_lib::Cli::parse()).await
}
