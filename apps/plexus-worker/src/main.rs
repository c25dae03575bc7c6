use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;
	let args = plexus_worker::Args::parse();
	plexus_worker::run(args).await
}
